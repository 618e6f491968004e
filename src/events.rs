//! Logging setup and the machine-readable console event stream.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::freshness::DeputyRow;
use crate::router::DropReport;

/// `RUST_LOG` wins over `--log-level`; a bad filter falls back to `info`.
pub fn init_logging(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// One JSON object per line for drop reports and deputy snapshots, for
/// tooling that watches the console. Disabled emitters drop everything.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Option<Sink>,
}

impl EventEmitter {
    /// Stderr when `json_output` is set, otherwise disabled.
    pub fn new(json_output: bool) -> Self {
        if json_output {
            Self::to_writer(io::stderr())
        } else {
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    pub fn enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn drop_report(&self, report: &DropReport) {
        self.emit(
            "drop_report",
            json!({
                "deputy": report.command.deputy,
                "command_id": report.command.command_id,
                "dropped_bytes": report.dropped_bytes,
            }),
        );
    }

    pub fn deputy_rows(&self, rows: &[DeputyRow]) {
        self.emit("deputies", json!({ "rows": rows }));
    }

    pub fn deputies_pruned(&self, names: &[String]) {
        self.emit("deputies_pruned", json!({ "deputies": names }));
    }

    fn emit(&self, event: &str, body: Value) {
        let Some(sink) = &self.sink else {
            return;
        };

        let mut line = json!({
            "ts": Utc::now().to_rfc3339(),
            "event": event,
        });
        if let (Some(line), Value::Object(fields)) = (line.as_object_mut(), body) {
            line.extend(fields);
        }

        let mut sink = sink.lock();
        if let Err(error) = writeln!(sink, "{line}").and_then(|()| sink.flush()) {
            tracing::debug!(%error, event, "console event not written");
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.enabled())
            .finish()
    }
}
