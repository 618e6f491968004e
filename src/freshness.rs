//! Deputy heartbeat tracking and freshness classification.
//!
//! Heartbeats overwrite a deputy's load and last-update time. A periodic
//! reconcile pass classifies every deputy by heartbeat age and marks the
//! ones the Sheriff no longer lists; those are only pruned on an explicit
//! [`DeputyFreshnessMonitor::cleanup`].

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::DeputyHeartbeat;

/// Label shown for a deputy that has never sent a heartbeat.
pub const NEVER_SEEN_LABEL: &str = "<never>";

const DEFAULT_WARN_AFTER: Duration = Duration::from_secs(2);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessBand {
    /// No heartbeat has ever been observed.
    Unknown,
    Fresh,
    Warning,
    Stale,
}

impl FreshnessBand {
    /// Whether observers should highlight the deputy.
    pub fn needs_attention(self) -> bool {
        !matches!(self, FreshnessBand::Fresh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessThresholds {
    /// Ages above this are at least `Warning`.
    pub warn_after: Duration,
    /// Ages above this are `Stale`.
    pub stale_after: Duration,
}

impl FreshnessThresholds {
    pub fn classify(&self, age: Option<Duration>) -> FreshnessBand {
        match age {
            None => FreshnessBand::Unknown,
            Some(age) if age <= self.warn_after => FreshnessBand::Fresh,
            Some(age) if age <= self.stale_after => FreshnessBand::Warning,
            Some(_) => FreshnessBand::Stale,
        }
    }
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            warn_after: DEFAULT_WARN_AFTER,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Snapshot of one deputy as observers see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeputyRow {
    pub name: String,
    pub band: FreshnessBand,
    pub age_secs: Option<f64>,
    pub last_update_label: String,
    pub cpu_load: f64,
    pub cpu_load_label: String,
    pub pending_removal: bool,
}

#[derive(Debug)]
struct DeputyRecord {
    cpu_load: f64,
    last_update: Option<DateTime<Utc>>,
    pending_removal: bool,
}

impl DeputyRecord {
    fn unseen() -> Self {
        Self {
            cpu_load: 0.0,
            last_update: None,
            pending_removal: false,
        }
    }

    /// Heartbeat age; timestamps from the future count as zero.
    fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_update?;
        Some((now - last).to_std().unwrap_or(Duration::ZERO))
    }
}

#[derive(Debug)]
pub struct DeputyFreshnessMonitor {
    thresholds: FreshnessThresholds,
    deputies: BTreeMap<String, DeputyRecord>,
}

impl DeputyFreshnessMonitor {
    pub fn new(thresholds: FreshnessThresholds) -> Self {
        Self {
            thresholds,
            deputies: BTreeMap::new(),
        }
    }

    pub fn thresholds(&self) -> FreshnessThresholds {
        self.thresholds
    }

    /// Record a heartbeat. Last write wins; no ordering checks.
    pub fn on_heartbeat(&mut self, heartbeat: &DeputyHeartbeat) {
        let record = self
            .deputies
            .entry(heartbeat.deputy.clone())
            .or_insert_with(DeputyRecord::unseen);
        record.cpu_load = heartbeat.cpu_load.max(0.0);
        record.last_update = Some(heartbeat.timestamp);
    }

    pub fn band(&self, deputy: &str, now: DateTime<Utc>) -> Option<FreshnessBand> {
        self.deputies
            .get(deputy)
            .map(|record| self.thresholds.classify(record.age(now)))
    }

    /// Classify every deputy against `live`, the Sheriff's current deputy
    /// set. Live deputies never heard from are tracked as `Unknown`; tracked
    /// deputies missing from `live` are marked for removal.
    pub fn reconcile<'a, I>(&mut self, live: I, now: DateTime<Utc>) -> Vec<DeputyRow>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = live.into_iter().collect();
        for name in &live {
            self.deputies
                .entry((*name).to_string())
                .or_insert_with(DeputyRecord::unseen);
        }

        let mut newly_marked = 0usize;
        for (name, record) in self.deputies.iter_mut() {
            let keep = live.contains(name.as_str());
            if !keep && !record.pending_removal {
                newly_marked += 1;
            }
            record.pending_removal = !keep;
        }
        if newly_marked > 0 {
            tracing::debug!(newly_marked, "deputies marked for removal");
        }

        self.rows(now)
    }

    /// Current rows without changing removal marks, sorted by name.
    pub fn rows(&self, now: DateTime<Utc>) -> Vec<DeputyRow> {
        self.deputies
            .iter()
            .map(|(name, record)| {
                let age = record.age(now);
                DeputyRow {
                    name: name.clone(),
                    band: self.thresholds.classify(age),
                    age_secs: age.map(|age| age.as_secs_f64()),
                    last_update_label: age_label(age),
                    cpu_load: record.cpu_load,
                    cpu_load_label: format!("{:.6}", record.cpu_load),
                    pending_removal: record.pending_removal,
                }
            })
            .collect()
    }

    /// Prune deputies marked by the last reconcile. Returns their names.
    pub fn cleanup(&mut self) -> Vec<String> {
        let removed: Vec<String> = self
            .deputies
            .iter()
            .filter(|(_, record)| record.pending_removal)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &removed {
            self.deputies.remove(name);
        }
        if !removed.is_empty() {
            tracing::info!(removed = ?removed, "pruned obsolete deputies");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.deputies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deputies.is_empty()
    }

    pub fn contains(&self, deputy: &str) -> bool {
        self.deputies.contains_key(deputy)
    }
}

impl Default for DeputyFreshnessMonitor {
    fn default() -> Self {
        Self::new(FreshnessThresholds::default())
    }
}

fn age_label(age: Option<Duration>) -> String {
    match age {
        Some(age) => format!("{:.1} seconds ago", age.as_secs_f64()),
        None => NEVER_SEEN_LABEL.to_string(),
    }
}
