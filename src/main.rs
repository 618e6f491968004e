use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use sheriff_console::config::Config;
use sheriff_console::console::{mailbox, ConsoleEvent, ConsoleHandle, ConsoleTimers, SheriffConsole};
use sheriff_console::events::init_logging;
use sheriff_console::settings::Settings;
use sheriff_console::types::{FleetView, SheriffEvent};

const MAILBOX_CAPACITY: usize = 1024;

/// A deputy without live commands is forgotten once it has been silent this
/// many stale windows.
const FORGET_AFTER_STALE_WINDOWS: u32 = 3;

#[derive(Default)]
struct DeputySighting {
    commands: usize,
    last_heartbeat: Option<Instant>,
}

/// Deputy set as inferred from the event stream itself.
struct ObservedFleet {
    deputies: Mutex<HashMap<String, DeputySighting>>,
    forget_after: Duration,
}

impl ObservedFleet {
    fn new(forget_after: Duration) -> Self {
        Self {
            deputies: Mutex::new(HashMap::new()),
            forget_after,
        }
    }

    fn observe(&self, event: &ConsoleEvent) {
        let mut deputies = self.deputies.lock();
        match event {
            ConsoleEvent::Heartbeat(heartbeat) => {
                deputies
                    .entry(heartbeat.deputy.clone())
                    .or_default()
                    .last_heartbeat = Some(Instant::now());
            }
            ConsoleEvent::Sheriff(SheriffEvent::CommandAdded { command }) => {
                deputies.entry(command.id.deputy.clone()).or_default().commands += 1;
            }
            ConsoleEvent::Sheriff(SheriffEvent::CommandRemoved { command }) => {
                if let Some(sighting) = deputies.get_mut(&command.id.deputy) {
                    sighting.commands = sighting.commands.saturating_sub(1);
                }
            }
            _ => {}
        }
    }
}

impl FleetView for ObservedFleet {
    fn live_deputies(&self) -> Vec<String> {
        let forget_after = self.forget_after;
        let mut deputies = self.deputies.lock();
        deputies.retain(|_, sighting| {
            sighting.commands > 0
                || sighting
                    .last_heartbeat
                    .is_some_and(|seen| seen.elapsed() <= forget_after)
        });
        deputies.keys().cloned().collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg)?;
    cfg.validate().context("invalid command line")?;

    let settings_path = cfg.settings.clone().or_else(Settings::default_path);
    let mut settings = load_settings(settings_path.as_ref());

    let forget_after = cfg.thresholds().stale_after * FORGET_AFTER_STALE_WINDOWS;
    let fleet = Arc::new(ObservedFleet::new(forget_after));
    let saved_rate_limit = settings.rate_limit();
    let started_with = cfg.rate_limit(saved_rate_limit);
    if cfg.explicit_rate_limit().is_none() && saved_rate_limit.is_some() {
        tracing::info!(kb_per_sec = started_with.kb_per_sec(), "using saved output rate limit");
    }
    let console = SheriffConsole::from_config(&cfg, saved_rate_limit, fleet.clone())
        .context("failed to build sheriff console")?;

    let (handle, rx) = mailbox(MAILBOX_CAPACITY);
    let timers = ConsoleTimers {
        upkeep: cfg.upkeep_interval(),
        reconcile: cfg.reconcile_interval(),
    };

    let reader = tokio::spawn(read_stdin(handle.clone(), fleet));
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            let _ = interrupt.send(ConsoleEvent::Shutdown).await;
        }
    });
    drop(handle);

    let printed = Arc::new(AtomicU64::new(0));
    let printer = tokio::spawn(print_global(console.clone(), printed.clone(), timers.upkeep));

    console.run(rx, timers).await;
    reader.abort();
    printer.abort();

    // Flush whatever the last tick did not get to, open line included.
    console.upkeep();
    let (lines, _) = console.global_lines_since(printed.load(Ordering::Acquire));
    let mut out = std::io::stdout().lock();
    for line in &lines {
        let _ = writeln!(out, "{}", line.text());
    }
    drop(out);

    let to_save = cfg.rate_limit_to_save(started_with, console.output_rate_limit());
    if let (Some(path), Some(rate_limit)) = (settings_path, to_save) {
        settings.set_rate_limit(rate_limit);
        if let Err(error) = settings.save(&path) {
            tracing::warn!(path = %path.display(), %error, "failed to save settings");
        }
    }

    Ok(())
}

fn load_settings(path: Option<&PathBuf>) -> Settings {
    let Some(path) = path else {
        return Settings::default();
    };
    match Settings::load(path) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "ignoring unreadable settings");
            Settings::default()
        }
    }
}

async fn read_stdin(handle: ConsoleHandle, fleet: Arc<ObservedFleet>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let event = match serde_json::from_str::<ConsoleEvent>(line) {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::warn!(%error, "skipping malformed event line");
                        continue;
                    }
                };
                fleet.observe(&event);
                if handle.send(event).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "stdin read failed");
                break;
            }
        }
    }
    tracing::debug!("stdin closed");
    let _ = handle.send(ConsoleEvent::Shutdown).await;
}

/// Print completed global lines as they appear. `printed` holds the seq of
/// the last line written.
async fn print_global(console: SheriffConsole, printed: Arc<AtomicU64>, period: Duration) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let since = printed.load(Ordering::Acquire);
        let (lines, gap) = console.global_lines_since(since);
        if let Some(oldest) = gap {
            tracing::warn!(missed = oldest - since - 1, "global output evicted before printing");
        }
        let mut out = std::io::stdout().lock();
        for line in lines.iter().take_while(|line| line.terminated) {
            let _ = writeln!(out, "{}", line.text());
            printed.store(line.seq, Ordering::Release);
        }
    }
}
