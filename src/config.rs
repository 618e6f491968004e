use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{ConsoleError, Result};
use crate::freshness::FreshnessThresholds;
use crate::rate_window::OutputRateLimit;
use crate::router::RouterConfig;

#[derive(Debug, Parser, Clone)]
#[command(name = "sheriff-console")]
#[command(about = "Aggregates deputy command output and heartbeats for the sheriff console")]
pub struct Config {
    /// Per-command output limit in KB/s [default: saved limit, else 500].
    #[arg(long)]
    pub rate_limit_kb: Option<u32>,

    /// Lines retained per command buffer and in the global buffer.
    #[arg(long, default_value_t = 2000)]
    pub max_lines: usize,

    #[arg(long, default_value_t = 500)]
    pub upkeep_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub reconcile_ms: u64,

    #[arg(long, default_value_t = 2000)]
    pub warn_after_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub stale_after_ms: u64,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = false)]
    pub json_output: bool,

    /// Settings file holding the last rate limit the operator chose.
    #[arg(long)]
    pub settings: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_lines == 0 {
            return Err(ConsoleError::invalid_config("--max-lines must be at least 1"));
        }
        if self.upkeep_ms == 0 || self.reconcile_ms == 0 {
            return Err(ConsoleError::invalid_config(
                "--upkeep-ms and --reconcile-ms must be positive",
            ));
        }
        if self.warn_after_ms > self.stale_after_ms {
            return Err(ConsoleError::invalid_config(
                "--warn-after-ms must not exceed --stale-after-ms",
            ));
        }
        Ok(())
    }

    /// Limit given on the command line, if any.
    pub fn explicit_rate_limit(&self) -> Option<OutputRateLimit> {
        self.rate_limit_kb.map(OutputRateLimit::new)
    }

    /// The flag wins over the saved limit, which wins over the default.
    pub fn rate_limit(&self, saved: Option<OutputRateLimit>) -> OutputRateLimit {
        self.explicit_rate_limit().or(saved).unwrap_or_default()
    }

    /// Limit to write back on exit. Only a limit the operator chose, on the
    /// command line or while running, is persisted.
    pub fn rate_limit_to_save(
        &self,
        started_with: OutputRateLimit,
        current: Option<OutputRateLimit>,
    ) -> Option<OutputRateLimit> {
        let current = current?;
        (self.rate_limit_kb.is_some() || current != started_with).then_some(current)
    }

    pub fn router_config(&self, saved: Option<OutputRateLimit>) -> RouterConfig {
        RouterConfig::new(self.rate_limit(saved), self.max_lines)
    }

    pub fn thresholds(&self) -> FreshnessThresholds {
        FreshnessThresholds {
            warn_after: Duration::from_millis(self.warn_after_ms),
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }

    pub fn upkeep_interval(&self) -> Duration {
        Duration::from_millis(self.upkeep_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_ms)
    }
}
