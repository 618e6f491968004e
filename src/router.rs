//! Fan-in of command output into per-command and global buffers.
//!
//! Every inbound chunk is checked against its command's [`RateWindow`]:
//! the accepted prefix is appended to both buffers, the rest is counted as
//! dropped and reported on the next upkeep tick.
//!
//! [`RateWindow`]: crate::rate_window::RateWindow

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::ansi::{self, StyleCache, StyledRun};
use crate::buffer::{TextBuffer, DEFAULT_MAX_RETAINED_LINES};
use crate::channel::{ChannelStats, CommandTelemetryChannel};
use crate::error::{ConsoleError, Result};
use crate::rate_window::OutputRateLimit;
use crate::types::{CommandId, CommandInfo, CommandStatus, OutputMessage, SheriffEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Operator-facing rate the quota was derived from. `None` when the
    /// quota was set in bytes directly.
    pub rate_limit: Option<OutputRateLimit>,
    /// Bytes each command may forward per window.
    pub window_quota: u64,
    pub max_retained_lines: usize,
}

impl RouterConfig {
    pub fn new(rate_limit: OutputRateLimit, max_retained_lines: usize) -> Self {
        Self {
            rate_limit: Some(rate_limit),
            window_quota: rate_limit.window_quota(),
            max_retained_lines,
        }
    }

    pub fn with_window_quota(window_quota: u64, max_retained_lines: usize) -> Self {
        Self {
            rate_limit: None,
            window_quota,
            max_retained_lines,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new(OutputRateLimit::default(), DEFAULT_MAX_RETAINED_LINES)
    }
}

/// What happened to one inbound output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No live channel for the identity; the message was discarded.
    UnknownCommand,
    Accepted { bytes: u64 },
    Truncated { accepted: u64, dropped: u64 },
    Dropped { bytes: u64 },
}

/// Drop total flushed for one command during an upkeep tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub command: CommandId,
    pub dropped_bytes: u64,
}

/// `[HH:MM:SS] ` prefix used on synthetic console lines.
pub fn timestamp_prefix(now: &DateTime<Local>) -> String {
    now.format("[%H:%M:%S] ").to_string()
}

/// Largest char boundary in `s` at or before `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Aggregate of every command's output. A partial line belongs to the
/// command that wrote it; anything else arriving first closes it.
#[derive(Debug)]
struct GlobalBuffer {
    lines: TextBuffer,
    open_source: Option<CommandId>,
}

impl GlobalBuffer {
    fn new(max_lines: usize) -> Self {
        Self {
            lines: TextBuffer::new(max_lines),
            open_source: None,
        }
    }

    fn append_output(&mut self, source: &CommandId, runs: Vec<StyledRun>) {
        if self.open_source.as_ref() != Some(source) {
            self.lines.end_open_line();
        }
        self.lines.append(runs);
        self.open_source = self.lines.has_open_line().then(|| source.clone());
    }

    /// Console-generated lines always start on a line of their own.
    fn append_synthetic(&mut self, runs: Vec<StyledRun>) {
        self.lines.end_open_line();
        self.lines.append(runs);
        self.open_source = None;
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.open_source = None;
    }
}

#[derive(Debug)]
pub struct TelemetryRouter {
    channels: BTreeMap<CommandId, CommandTelemetryChannel>,
    global: GlobalBuffer,
    styles: StyleCache,
    config: RouterConfig,
}

impl TelemetryRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            channels: BTreeMap::new(),
            global: GlobalBuffer::new(config.max_retained_lines),
            styles: StyleCache::new(),
            config,
        }
    }

    pub fn config(&self) -> RouterConfig {
        self.config
    }

    /// The rate last configured, if the quota came from one.
    pub fn output_rate_limit(&self) -> Option<OutputRateLimit> {
        self.config.rate_limit
    }

    pub fn set_output_rate_limit(&mut self, rate_limit: OutputRateLimit) {
        self.apply_window_quota(rate_limit.window_quota());
        self.config.rate_limit = Some(rate_limit);
        tracing::info!(
            kb_per_sec = rate_limit.kb_per_sec(),
            window_quota = self.config.window_quota,
            "output rate limit updated"
        );
    }

    /// Set the quota in bytes. Clears the configured rate.
    pub fn set_window_quota(&mut self, window_quota: u64) {
        self.config.rate_limit = None;
        self.apply_window_quota(window_quota);
    }

    fn apply_window_quota(&mut self, window_quota: u64) {
        self.config.window_quota = window_quota;
        for channel in self.channels.values_mut() {
            channel.set_window_quota(window_quota);
        }
    }

    pub fn set_max_retained_lines(&mut self, max_lines: usize) -> Result<()> {
        if max_lines == 0 {
            return Err(ConsoleError::invalid_config(
                "max_retained_lines must be at least 1",
            ));
        }
        self.config.max_retained_lines = max_lines;
        let mut evicted = self.global.lines.set_max_lines(max_lines);
        for channel in self.channels.values_mut() {
            evicted += channel.set_max_lines(max_lines);
        }
        tracing::debug!(max_lines, evicted, "retention limit updated");
        Ok(())
    }

    pub fn handle_sheriff_event(&mut self, event: &SheriffEvent) -> Result<()> {
        match event {
            SheriffEvent::CommandAdded { command } => self.on_command_added(command),
            SheriffEvent::CommandRemoved { command } => {
                self.on_command_removed(command);
                Ok(())
            }
            SheriffEvent::StatusChanged {
                command,
                old_status,
                new_status,
            } => {
                self.on_status_changed(command, *old_status, *new_status);
                Ok(())
            }
        }
    }

    /// Open a channel for a newly added command.
    pub fn on_command_added(&mut self, command: &CommandInfo) -> Result<()> {
        if self.channels.contains_key(&command.id) {
            return Err(ConsoleError::DuplicateCommand(command.id.clone()));
        }
        self.channels.insert(
            command.id.clone(),
            CommandTelemetryChannel::new(
                command.id.clone(),
                command.exec_str.clone(),
                self.config.window_quota,
                self.config.max_retained_lines,
            ),
        );
        let line = format!(
            "{}Added [{}] [{}] [{}]\n",
            timestamp_prefix(&Local::now()),
            command.id.deputy,
            command.id.command_id,
            command.exec_str
        );
        self.append_global(&line);
        tracing::debug!(command = %command.id, "telemetry channel opened");
        Ok(())
    }

    /// Detach the command's channel. Later messages for it are discarded.
    /// Returns false if no channel existed.
    pub fn on_command_removed(&mut self, command: &CommandInfo) -> bool {
        if self.channels.remove(&command.id).is_none() {
            tracing::debug!(command = %command.id, "remove for unknown command ignored");
            return false;
        }
        let line = format!(
            "{}[{}] removed [{}] [{}]\n",
            timestamp_prefix(&Local::now()),
            command.id.deputy,
            command.id.command_id,
            command.exec_str
        );
        self.append_global(&line);
        tracing::debug!(command = %command.id, "telemetry channel closed");
        true
    }

    pub fn on_status_changed(
        &mut self,
        command: &CommandId,
        old_status: CommandStatus,
        new_status: CommandStatus,
    ) {
        let line = format!(
            "{}[{}] new status: {}\n",
            timestamp_prefix(&Local::now()),
            command.command_id,
            new_status
        );
        self.append_global(&line);
        tracing::trace!(command = %command, %old_status, %new_status, "command status changed");
    }

    /// Route one output message through its command's rate window.
    pub fn ingest(&mut self, message: &OutputMessage) -> IngestOutcome {
        let Some(channel) = self.channels.get_mut(&message.command) else {
            tracing::trace!(command = %message.command, "output for unknown command discarded");
            return IngestOutcome::UnknownCommand;
        };

        let text = message.text.as_str();
        let length = text.len() as u64;
        if length == 0 {
            return IngestOutcome::Accepted { bytes: 0 };
        }

        let available = channel.rate_window().remaining_quota();
        if available == 0 {
            channel.record_drop(length);
            return IngestOutcome::Dropped { bytes: length };
        }

        let cut = if available >= length {
            text.len()
        } else {
            floor_char_boundary(text, available as usize)
        };
        let accepted = cut as u64;
        if accepted > 0 {
            let runs = ansi::scan(&text[..cut], &mut self.styles);
            channel.append(runs.iter().cloned());
            self.global.append_output(&message.command, runs);
            channel.record_accepted(accepted);
        }

        let dropped = length - accepted;
        if dropped == 0 {
            return IngestOutcome::Accepted { bytes: accepted };
        }
        channel.record_drop(dropped);
        if accepted == 0 {
            IngestOutcome::Dropped { bytes: dropped }
        } else {
            IngestOutcome::Truncated { accepted, dropped }
        }
    }

    pub fn upkeep(&mut self) -> Vec<DropReport> {
        self.upkeep_at(&Local::now())
    }

    /// Flush pending drop reports, then rotate every rate window.
    pub fn upkeep_at(&mut self, now: &DateTime<Local>) -> Vec<DropReport> {
        let prefix = timestamp_prefix(now);
        let mut reports = Vec::new();

        for channel in self.channels.values_mut() {
            let dropped = channel.take_drop_count();
            if dropped > 0 {
                let command_line = format!(
                    "{prefix}\nSHERIFF RATE LIMIT: Ignored {dropped} bytes of output\n"
                );
                channel.append(ansi::scan(&command_line, &mut self.styles));

                let global_line = format!(
                    "{prefix}Ignored {dropped} bytes of output from {}\n",
                    channel.command()
                );
                self.global
                    .append_synthetic(ansi::scan(&global_line, &mut self.styles));

                reports.push(DropReport {
                    command: channel.command().clone(),
                    dropped_bytes: dropped,
                });
            }
            channel.rotate_window();
        }

        if !reports.is_empty() {
            tracing::debug!(commands = reports.len(), "flushed rate limit drop reports");
        }
        reports
    }

    fn append_global(&mut self, line: &str) {
        let runs = ansi::scan(line, &mut self.styles);
        self.global.append_synthetic(runs);
    }

    pub fn global_buffer(&self) -> &TextBuffer {
        &self.global.lines
    }

    pub fn channel(&self, command: &CommandId) -> Option<&CommandTelemetryChannel> {
        self.channels.get(command)
    }

    pub fn stats(&self, command: &CommandId) -> Option<ChannelStats> {
        self.channels.get(command).map(CommandTelemetryChannel::stats)
    }

    pub fn command_ids(&self) -> impl Iterator<Item = &CommandId> {
        self.channels.keys()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn clear_global(&mut self) {
        self.global.clear();
    }

    pub fn clear_command(&mut self, command: &CommandId) -> bool {
        match self.channels.get_mut(command) {
            Some(channel) => {
                channel.clear();
                true
            }
            None => false,
        }
    }
}

impl Default for TelemetryRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}
