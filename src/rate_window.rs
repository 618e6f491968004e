use std::collections::VecDeque;
use std::time::Duration;

/// Number of upkeep ticks of history kept per command.
pub const WINDOW_SLICES: usize = 6;

/// Default operator-facing output limit (500 KB/s).
pub const DEFAULT_MAX_KB_PER_SEC: u32 = 500;

/// Default upkeep tick; one slice of the window covers one tick.
pub const DEFAULT_UPKEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Bytes per "KB" in the rate limit setting.
const BYTES_PER_KB: u64 = 1000;

/// The quota covers 2.5 seconds of output at the configured rate.
const WINDOW_MILLIS: u64 = 2500;

/// Operator-facing output rate setting, in KB per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRateLimit {
    kb_per_sec: u32,
}

impl OutputRateLimit {
    pub fn new(kb_per_sec: u32) -> Self {
        Self { kb_per_sec }
    }

    pub fn kb_per_sec(self) -> u32 {
        self.kb_per_sec
    }

    /// Byte quota for one window.
    pub fn window_quota(self) -> u64 {
        self.kb_per_sec as u64 * BYTES_PER_KB * WINDOW_MILLIS / 1000
    }
}

impl Default for OutputRateLimit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KB_PER_SEC)
    }
}

/// Sliding histogram of bytes accepted per upkeep tick.
///
/// The newest slice is at the back. `rotate` is called exactly once per
/// upkeep tick, so the sum always covers the last `WINDOW_SLICES` ticks.
#[derive(Debug, Clone)]
pub struct RateWindow {
    quota: u64,
    slices: VecDeque<u64>,
}

impl RateWindow {
    pub fn new(quota: u64) -> Self {
        let mut slices = VecDeque::with_capacity(WINDOW_SLICES + 1);
        slices.extend(std::iter::repeat(0).take(WINDOW_SLICES));
        Self { quota, slices }
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Change the quota. History is kept, so a lowered quota may leave the
    /// window over budget until enough slices rotate out.
    pub fn set_quota(&mut self, quota: u64) {
        self.quota = quota;
    }

    /// Bytes accepted across the whole window.
    pub fn used(&self) -> u64 {
        self.slices.iter().sum()
    }

    pub fn remaining_quota(&self) -> u64 {
        self.quota.saturating_sub(self.used())
    }

    /// Count `accepted` bytes against the newest slice.
    pub fn record(&mut self, accepted: u64) {
        if let Some(newest) = self.slices.back_mut() {
            *newest += accepted;
        }
    }

    /// Drop the oldest slice and open a fresh one.
    pub fn rotate(&mut self) {
        self.slices.pop_front();
        self.slices.push_back(0);
    }

    pub fn slices(&self) -> impl Iterator<Item = u64> + '_ {
        self.slices.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limit_matches_console_default() {
        let limit = OutputRateLimit::default();
        assert_eq!(limit.kb_per_sec(), 500);
        assert_eq!(limit.window_quota(), 1_250_000);
    }

    #[test]
    fn window_quota_scales_by_two_and_a_half() {
        assert_eq!(OutputRateLimit::new(1).window_quota(), 2500);
        assert_eq!(OutputRateLimit::new(0).window_quota(), 0);
    }

    #[test]
    fn fresh_window_has_full_quota() {
        let window = RateWindow::new(100);
        assert_eq!(window.remaining_quota(), 100);
        assert_eq!(window.slices().count(), WINDOW_SLICES);
    }

    #[test]
    fn record_lands_in_newest_slice() {
        let mut window = RateWindow::new(100);
        window.record(30);
        window.record(10);
        let slices: Vec<u64> = window.slices().collect();
        assert_eq!(slices, vec![0, 0, 0, 0, 0, 40]);
        assert_eq!(window.remaining_quota(), 60);
    }

    #[test]
    fn usage_expires_after_six_rotations() {
        let mut window = RateWindow::new(100);
        window.record(100);
        assert_eq!(window.remaining_quota(), 0);
        for _ in 0..WINDOW_SLICES - 1 {
            window.rotate();
            assert_eq!(window.remaining_quota(), 0);
        }
        window.rotate();
        assert_eq!(window.remaining_quota(), 100);
    }

    #[test]
    fn rotate_keeps_slice_count_constant() {
        let mut window = RateWindow::new(10);
        for _ in 0..20 {
            window.rotate();
        }
        assert_eq!(window.slices().count(), WINDOW_SLICES);
    }

    #[test]
    fn lowered_quota_saturates_at_zero() {
        let mut window = RateWindow::new(100);
        window.record(80);
        window.set_quota(50);
        assert_eq!(window.remaining_quota(), 0);
        assert_eq!(window.quota(), 50);
    }
}
