//! Deputy liveness over a simulated timeline.

use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use sheriff_console::{
    freshness::{DeputyFreshnessMonitor, FreshnessBand, FreshnessThresholds, NEVER_SEEN_LABEL},
    types::DeputyHeartbeat,
};

fn heartbeat(deputy: &str, cpu_load: f64, at: chrono::DateTime<Utc>) -> DeputyHeartbeat {
    DeputyHeartbeat {
        deputy: deputy.into(),
        cpu_load,
        timestamp: at,
    }
}

#[test]
fn band_walks_fresh_warning_stale_as_heartbeats_stop() {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut monitor = DeputyFreshnessMonitor::default();
    monitor.on_heartbeat(&heartbeat("alpha", 0.5, start));

    let expected = [
        (0, FreshnessBand::Fresh),
        (1_000, FreshnessBand::Fresh),
        (2_000, FreshnessBand::Fresh),
        (2_500, FreshnessBand::Warning),
        (5_000, FreshnessBand::Warning),
        (5_001, FreshnessBand::Stale),
        (60_000, FreshnessBand::Stale),
    ];
    for (offset_ms, band) in expected {
        let now = start + TimeDelta::milliseconds(offset_ms);
        let rows = monitor.reconcile(["alpha"], now);
        assert_eq!(rows[0].band, band, "at +{offset_ms}ms");
    }

    // A new heartbeat brings it straight back.
    let later = start + TimeDelta::seconds(61);
    monitor.on_heartbeat(&heartbeat("alpha", 0.1, later));
    assert_eq!(monitor.band("alpha", later), Some(FreshnessBand::Fresh));
}

#[test]
fn fleet_churn_marks_then_prunes() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut monitor = DeputyFreshnessMonitor::default();
    monitor.on_heartbeat(&heartbeat("alpha", 0.2, now));
    monitor.on_heartbeat(&heartbeat("beta", 0.9, now));

    let rows = monitor.reconcile(["alpha", "beta", "gamma"], now);
    let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta", "gamma"]);
    assert_eq!(rows[2].band, FreshnessBand::Unknown);
    assert_eq!(rows[2].last_update_label, NEVER_SEEN_LABEL);

    // beta leaves, then comes back before anyone cleans up.
    let rows = monitor.reconcile(["alpha", "gamma"], now);
    assert!(rows.iter().find(|row| row.name == "beta").unwrap().pending_removal);
    let rows = monitor.reconcile(["alpha", "beta", "gamma"], now);
    assert!(rows.iter().all(|row| !row.pending_removal));
    assert!(monitor.cleanup().is_empty());

    monitor.reconcile(["gamma"], now);
    assert_eq!(monitor.cleanup(), vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(monitor.len(), 1);
    assert!(monitor.contains("gamma"));
}

#[test]
fn custom_thresholds_are_honored() {
    let thresholds = FreshnessThresholds {
        warn_after: Duration::from_millis(100),
        stale_after: Duration::from_millis(300),
    };
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut monitor = DeputyFreshnessMonitor::new(thresholds);
    monitor.on_heartbeat(&heartbeat("alpha", 0.0, now - TimeDelta::milliseconds(200)));
    let rows = monitor.reconcile(["alpha"], now);
    assert_eq!(rows[0].band, FreshnessBand::Warning);
    assert!(rows[0].band.needs_attention());
    assert_eq!(rows[0].cpu_load_label, "0.000000");
}
