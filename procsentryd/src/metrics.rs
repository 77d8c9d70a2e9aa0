use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-lifetime counters, shared by the timers and the HTTP surface.
pub struct Metrics {
    started: Instant,
    metric_ticks: AtomicU64,
    enforce_ticks: AtomicU64,
    anomalies_flagged: AtomicU64,
    leak_warnings: AtomicU64,
    enforcement_alerts: AtomicU64,
    failed_actions: AtomicU64,
    last_snapshot_ms: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub metric_ticks: u64,
    pub enforce_ticks: u64,
    pub anomalies_flagged: u64,
    pub leak_warnings: u64,
    pub enforcement_alerts: u64,
    pub failed_actions: u64,
    pub last_snapshot_ms: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            metric_ticks: AtomicU64::new(0),
            enforce_ticks: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            leak_warnings: AtomicU64::new(0),
            enforcement_alerts: AtomicU64::new(0),
            failed_actions: AtomicU64::new(0),
            last_snapshot_ms: AtomicU64::new(0),
        }
    }

    /// Returns the tick number just completed, starting at 1.
    pub fn record_metric_tick(&self, snapshot_ms: u64, anomalies: usize, leaks: usize) -> u64 {
        self.last_snapshot_ms.store(snapshot_ms, Ordering::Relaxed);
        self.anomalies_flagged
            .fetch_add(anomalies as u64, Ordering::Relaxed);
        self.leak_warnings.fetch_add(leaks as u64, Ordering::Relaxed);
        self.metric_ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_enforce_tick(&self, alerts: &[String]) {
        self.enforce_ticks.fetch_add(1, Ordering::SeqCst);
        self.enforcement_alerts
            .fetch_add(alerts.len() as u64, Ordering::Relaxed);
        let failed = alerts.iter().filter(|a| a.starts_with("FAILED")).count();
        self.failed_actions
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            metric_ticks: self.metric_ticks.load(Ordering::SeqCst),
            enforce_ticks: self.enforce_ticks.load(Ordering::SeqCst),
            anomalies_flagged: self.anomalies_flagged.load(Ordering::Relaxed),
            leak_warnings: self.leak_warnings.load(Ordering::Relaxed),
            enforcement_alerts: self.enforcement_alerts.load(Ordering::Relaxed),
            failed_actions: self.failed_actions.load(Ordering::Relaxed),
            last_snapshot_ms: self.last_snapshot_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
