use serde::Serialize;

use crate::ansi::StyledRun;
use crate::buffer::TextBuffer;
use crate::rate_window::RateWindow;
use crate::types::CommandId;

/// Lifetime counters for one command's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub accepted_bytes: u64,
    pub dropped_bytes: u64,
    pub drop_reports: u32,
}

/// Per-command output state: retained text, rate window and pending drops.
#[derive(Debug)]
pub struct CommandTelemetryChannel {
    command: CommandId,
    exec_str: String,
    buffer: TextBuffer,
    rate_window: RateWindow,
    drop_count: u64,
    stats: ChannelStats,
}

impl CommandTelemetryChannel {
    pub fn new(command: CommandId, exec_str: String, window_quota: u64, max_lines: usize) -> Self {
        Self {
            command,
            exec_str,
            buffer: TextBuffer::new(max_lines),
            rate_window: RateWindow::new(window_quota),
            drop_count: 0,
            stats: ChannelStats::default(),
        }
    }

    pub fn command(&self) -> &CommandId {
        &self.command
    }

    pub fn exec_str(&self) -> &str {
        &self.exec_str
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn rate_window(&self) -> &RateWindow {
        &self.rate_window
    }

    pub fn drop_count(&self) -> u64 {
        self.drop_count
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub(crate) fn append<I>(&mut self, runs: I) -> usize
    where
        I: IntoIterator<Item = StyledRun>,
    {
        self.buffer.append(runs)
    }

    /// Count `accepted` bytes against the window.
    pub(crate) fn record_accepted(&mut self, accepted: u64) {
        self.rate_window.record(accepted);
        self.stats.accepted_bytes += accepted;
    }

    /// Count dropped bytes. Reporting happens on the next upkeep tick.
    pub(crate) fn record_drop(&mut self, dropped: u64) {
        self.drop_count += dropped;
        self.stats.dropped_bytes += dropped;
    }

    /// Return the pending drop count and reset it to zero.
    pub(crate) fn take_drop_count(&mut self) -> u64 {
        let dropped = std::mem::take(&mut self.drop_count);
        if dropped > 0 {
            self.stats.drop_reports += 1;
        }
        dropped
    }

    pub(crate) fn rotate_window(&mut self) {
        self.rate_window.rotate();
    }

    pub(crate) fn set_window_quota(&mut self, quota: u64) {
        self.rate_window.set_quota(quota);
    }

    pub(crate) fn set_max_lines(&mut self, max_lines: usize) -> usize {
        self.buffer.set_max_lines(max_lines)
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansi::{scan, StyleCache};

    fn channel() -> CommandTelemetryChannel {
        CommandTelemetryChannel::new(CommandId::new("d", "c"), "./run".into(), 100, 3)
    }

    #[test]
    fn record_drop_accumulates_without_reporting() {
        let mut ch = channel();
        ch.record_drop(10);
        ch.record_drop(5);
        assert_eq!(ch.drop_count(), 15);
        assert_eq!(ch.stats().drop_reports, 0);
        assert!(ch.buffer().is_empty());
    }

    #[test]
    fn take_drop_count_resets_and_counts_report() {
        let mut ch = channel();
        ch.record_drop(7);
        assert_eq!(ch.take_drop_count(), 7);
        assert_eq!(ch.drop_count(), 0);
        assert_eq!(ch.take_drop_count(), 0);
        let stats = ch.stats();
        assert_eq!(stats.drop_reports, 1);
        assert_eq!(stats.dropped_bytes, 7);
    }

    #[test]
    fn append_respects_retention() {
        let mut cache = StyleCache::new();
        let mut ch = channel();
        ch.append(scan("1\n2\n3\n4\n", &mut cache));
        assert_eq!(ch.buffer().line_count(), 3);
        assert_eq!(ch.buffer().text(), "2\n3\n4\n");
    }

    #[test]
    fn accepted_bytes_consume_quota() {
        let mut ch = channel();
        ch.record_accepted(60);
        assert_eq!(ch.rate_window().remaining_quota(), 40);
        assert_eq!(ch.stats().accepted_bytes, 60);
    }

    #[test]
    fn stats_serialize_as_flat_object() {
        let json = serde_json::to_value(ChannelStats::default()).unwrap();
        assert_eq!(json["accepted_bytes"], 0);
        assert_eq!(json["drop_reports"], 0);
    }
}
