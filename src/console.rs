//! Single-owner runtime around the router and the deputy monitor.
//!
//! All state sits behind one mutex. Bus callbacks, the upkeep tick and the
//! reconcile tick all go through it, so mutation is serialized; the lock is
//! never held across an await point.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::buffer::BufferLine;
use crate::channel::ChannelStats;
use crate::config::Config;
use crate::error::{ConsoleError, Result};
use crate::events::EventEmitter;
use crate::freshness::{DeputyFreshnessMonitor, DeputyRow, FreshnessThresholds};
use crate::rate_window::{OutputRateLimit, DEFAULT_UPKEEP_INTERVAL};
use crate::router::{DropReport, IngestOutcome, RouterConfig, TelemetryRouter};
use crate::types::{CommandId, DeputyHeartbeat, FleetView, OutputMessage, SheriffEvent};

const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the console reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleEvent {
    Output(OutputMessage),
    Heartbeat(DeputyHeartbeat),
    Sheriff(SheriffEvent),
    SetRateLimit { kb_per_sec: u32 },
    SetMaxRetainedLines { lines: usize },
    ClearGlobal,
    CleanupDeputies,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleTimers {
    pub upkeep: Duration,
    pub reconcile: Duration,
}

impl Default for ConsoleTimers {
    fn default() -> Self {
        Self {
            upkeep: DEFAULT_UPKEEP_INTERVAL,
            reconcile: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

/// Sending side of the console mailbox.
#[derive(Clone, Debug)]
pub struct ConsoleHandle {
    tx: mpsc::Sender<ConsoleEvent>,
}

impl ConsoleHandle {
    pub async fn send(&self, event: ConsoleEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ConsoleError::MailboxClosed)
    }

    pub fn try_send(&self, event: ConsoleEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ConsoleError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ConsoleError::MailboxClosed,
        })
    }
}

/// Create a mailbox for [`SheriffConsole::run`].
pub fn mailbox(capacity: usize) -> (ConsoleHandle, mpsc::Receiver<ConsoleEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ConsoleHandle { tx }, rx)
}

struct ConsoleState {
    router: TelemetryRouter,
    deputies: DeputyFreshnessMonitor,
    last_rows: Vec<DeputyRow>,
}

#[derive(Clone)]
pub struct SheriffConsole {
    state: Arc<Mutex<ConsoleState>>,
    fleet: Arc<dyn FleetView>,
    emitter: EventEmitter,
}

impl SheriffConsole {
    pub fn new(
        router_config: RouterConfig,
        thresholds: FreshnessThresholds,
        fleet: Arc<dyn FleetView>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConsoleState {
                router: TelemetryRouter::new(router_config),
                deputies: DeputyFreshnessMonitor::new(thresholds),
                last_rows: Vec::new(),
            })),
            fleet,
            emitter,
        }
    }

    /// Build from the command line. `saved_rate_limit` applies unless the
    /// command line names a limit of its own.
    pub fn from_config(
        cfg: &Config,
        saved_rate_limit: Option<OutputRateLimit>,
        fleet: Arc<dyn FleetView>,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(
            cfg.router_config(saved_rate_limit),
            cfg.thresholds(),
            fleet,
            EventEmitter::new(cfg.json_output),
        ))
    }

    /// Apply one event. `Break` means the console was asked to stop.
    pub fn dispatch(&self, event: ConsoleEvent) -> Result<ControlFlow<()>> {
        match event {
            ConsoleEvent::Output(message) => {
                self.ingest(&message);
            }
            ConsoleEvent::Heartbeat(heartbeat) => {
                self.state.lock().deputies.on_heartbeat(&heartbeat);
            }
            ConsoleEvent::Sheriff(event) => {
                self.state.lock().router.handle_sheriff_event(&event)?;
            }
            ConsoleEvent::SetRateLimit { kb_per_sec } => {
                self.set_output_rate_limit(OutputRateLimit::new(kb_per_sec));
            }
            ConsoleEvent::SetMaxRetainedLines { lines } => {
                self.state.lock().router.set_max_retained_lines(lines)?;
            }
            ConsoleEvent::ClearGlobal => {
                self.state.lock().router.clear_global();
            }
            ConsoleEvent::CleanupDeputies => {
                let removed = self.cleanup_deputies();
                if !removed.is_empty() {
                    self.emitter.deputies_pruned(&removed);
                }
            }
            ConsoleEvent::Shutdown => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(()))
    }

    pub fn ingest(&self, message: &OutputMessage) -> IngestOutcome {
        self.state.lock().router.ingest(message)
    }

    /// One upkeep tick: flush drop reports and rotate rate windows.
    pub fn upkeep(&self) -> Vec<DropReport> {
        let reports = self.state.lock().router.upkeep();
        for report in &reports {
            self.emitter.drop_report(report);
        }
        reports
    }

    /// Reclassify deputies against the fleet's current deputy set.
    pub fn reconcile(&self) -> Vec<DeputyRow> {
        let live = self.fleet.live_deputies();
        let rows = {
            let mut state = self.state.lock();
            let rows = state
                .deputies
                .reconcile(live.iter().map(String::as_str), Utc::now());
            state.last_rows = rows.clone();
            rows
        };
        self.emitter.deputy_rows(&rows);
        rows
    }

    pub fn cleanup_deputies(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let removed = state.deputies.cleanup();
        state.last_rows.retain(|row| !removed.contains(&row.name));
        removed
    }

    /// Rows from the most recent reconcile.
    pub fn deputy_rows(&self) -> Vec<DeputyRow> {
        self.state.lock().last_rows.clone()
    }

    pub fn set_output_rate_limit(&self, rate_limit: OutputRateLimit) {
        self.state.lock().router.set_output_rate_limit(rate_limit);
    }

    pub fn output_rate_limit(&self) -> Option<OutputRateLimit> {
        self.state.lock().router.output_rate_limit()
    }

    pub fn global_lines_since(&self, since_seq: u64) -> (Vec<BufferLine>, Option<u64>) {
        self.state.lock().router.global_buffer().lines_since(since_seq)
    }

    pub fn global_text(&self) -> String {
        self.state.lock().router.global_buffer().text()
    }

    pub fn command_text(&self, command: &CommandId) -> Option<String> {
        self.state
            .lock()
            .router
            .channel(command)
            .map(|channel| channel.buffer().text())
    }

    pub fn command_stats(&self, command: &CommandId) -> Option<ChannelStats> {
        self.state.lock().router.stats(command)
    }

    /// Read-only access to the router for presentation code.
    pub fn with_router<R>(&self, f: impl FnOnce(&TelemetryRouter) -> R) -> R {
        f(&self.state.lock().router)
    }

    /// Drive the console until every sender is dropped or `Shutdown` arrives.
    pub async fn run(&self, mut rx: mpsc::Receiver<ConsoleEvent>, timers: ConsoleTimers) {
        let mut upkeep = tokio::time::interval(timers.upkeep);
        upkeep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile = tokio::time::interval(timers.reconcile);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            upkeep_ms = timers.upkeep.as_millis() as u64,
            reconcile_ms = timers.reconcile.as_millis() as u64,
            "console loop started"
        );

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("console mailbox closed");
                        break;
                    };
                    match self.dispatch(event) {
                        Ok(ControlFlow::Break(())) => break,
                        Ok(ControlFlow::Continue(())) => {}
                        Err(error) => tracing::warn!(%error, "console event rejected"),
                    }
                }
                _ = upkeep.tick() => {
                    self.upkeep();
                }
                _ = reconcile.tick() => {
                    self.reconcile();
                }
            }
        }

        tracing::info!("console loop stopped");
    }
}
