//! The two periodic timers and the state they share with the HTTP surface.
//!
//! The metrics tick snapshots the host, appends history, scores outliers,
//! applies the leak rule and refreshes the CPU forecast. The enforcement tick
//! takes its own fresh process table and applies limit rules. Both run to
//! completion on the runtime thread; a slow tick delays the next one.

use crate::alerts::AlertStore;
use crate::anomaly::{AnomalyLog, OutlierDetector, detect_memory_leak};
use crate::config::Config;
use crate::control::{ProcessControl, SignalController};
use crate::forecast::{ForecastError, Forecaster, TrainReport};
use crate::history::HistoryStore;
use crate::limits::LimitEngine;
use crate::metrics::Metrics;
use crate::snapshot::{ProcessSource, Snapshotter};
use crate::store::{RuleStore, WhitelistStore};
use crate::types::{
    AnomalyRecord, HistoryRecord, LeakSeverity, LeakWarning, ProcessTable, SystemSnapshot,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};

/// Everything one metrics tick produced.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub system: SystemSnapshot,
    pub processes: ProcessTable,
    pub anomalies: Vec<AnomalyRecord>,
    pub leaks: Vec<LeakWarning>,
    pub prediction: Option<f64>,
}

pub struct Monitor {
    config: Config,
    source: Mutex<Box<dyn ProcessSource>>,
    limits: Mutex<LimitEngine>,
    history: HistoryStore,
    detector: OutlierDetector,
    forecaster: Forecaster,
    rules: RuleStore,
    whitelist: WhitelistStore,
    controller: Arc<dyn ProcessControl>,
    alerts: AlertStore,
    metrics: Metrics,
    latest: RwLock<Option<Arc<TickReport>>>,
}

impl Monitor {
    /// Live host: two independent snapshotters so enforcement never reuses
    /// the metrics tick's table.
    pub fn new(config: Config) -> Self {
        let gpu = config.runtime.gpu;
        Self::from_parts(
            config,
            Box::new(Snapshotter::new(gpu)),
            Box::new(Snapshotter::new(false)),
            Arc::new(SignalController::new()),
        )
    }

    pub fn from_parts(
        config: Config,
        metrics_source: Box<dyn ProcessSource>,
        enforce_source: Box<dyn ProcessSource>,
        controller: Arc<dyn ProcessControl>,
    ) -> Self {
        let history = HistoryStore::new(config.history_path(), config.history.capacity);
        let detector = OutlierDetector::new(
            config.detector.clone(),
            AnomalyLog::new(config.anomaly_log_path()),
        );
        let forecaster = Forecaster::new(
            history.clone(),
            config.model_path(),
            config.forecast.clone(),
        );
        let rules = RuleStore::new(config.rules_path());
        let whitelist = WhitelistStore::new(config.whitelist_path());
        let limits = LimitEngine::new(
            enforce_source,
            controller.clone(),
            rules.clone(),
            whitelist.clone(),
        );
        let alerts = AlertStore::new(config.alerts.capacity, Some(config.alerts_path()));

        Self {
            config,
            source: Mutex::new(metrics_source),
            limits: Mutex::new(limits),
            history,
            detector,
            forecaster,
            rules,
            whitelist,
            controller,
            alerts,
            metrics: Metrics::new(),
            latest: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn detector(&self) -> &OutlierDetector {
        &self.detector
    }

    pub fn forecaster(&self) -> &Forecaster {
        &self.forecaster
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    pub fn controller(&self) -> &dyn ProcessControl {
        self.controller.as_ref()
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn latest(&self) -> Option<Arc<TickReport>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metrics_tick(&self) -> Arc<TickReport> {
        let started = Instant::now();
        let (system, processes) = lock(&self.source).snapshot();
        let snapshot_ms = started.elapsed().as_millis() as u64;
        debug!(
            "[monitor] snapshot of {} processes in {snapshot_ms} ms",
            processes.len()
        );

        self.history.append(&HistoryRecord::from_snapshot(&system));
        let anomalies = self.detector.detect(&processes);
        let leaks = detect_memory_leak(&processes);
        for leak in leaks.iter().filter(|l| l.severity == LeakSeverity::Critical) {
            warn!("[monitor] {} ({}): {}", leak.name, leak.pid, leak.warning);
        }

        let tick = self
            .metrics
            .record_metric_tick(snapshot_ms, anomalies.len(), leaks.len());
        let every = self.config.forecast.retrain_every_ticks;
        if every > 0 && tick % every == 0 {
            self.retrain();
        }

        let prediction = self
            .forecaster
            .predict(f64::from(system.cpu_percent), f64::from(system.mem_percent));

        let report = Arc::new(TickReport {
            system,
            processes,
            anomalies,
            leaks,
            prediction,
        });
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    pub fn enforce_tick(&self) -> Vec<String> {
        let alerts = lock(&self.limits).enforce();
        self.alerts.record_all(&alerts);
        self.metrics.record_enforce_tick(&alerts);
        alerts
    }

    /// Periodic retrain; a short history is expected early on and only
    /// logged at debug.
    pub fn retrain(&self) -> Option<TrainReport> {
        match self.forecaster.train() {
            Ok(report) => Some(report),
            Err(ForecastError::InsufficientData { have, need }) => {
                debug!("[monitor] forecast retrain skipped: {have}/{need} records");
                None
            }
            Err(err) => {
                warn!("[monitor] forecast retrain failed: {err}");
                None
            }
        }
    }

    /// Drive both timers forever.
    pub async fn run(self: Arc<Self>) {
        let mut metrics_timer = interval(Duration::from_secs(
            self.config.runtime.metrics_interval_secs,
        ));
        metrics_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut enforce_timer = interval(Duration::from_secs(
            self.config.runtime.enforce_interval_secs,
        ));
        enforce_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "[monitor] running: metrics every {}s, enforcement every {}s",
            self.config.runtime.metrics_interval_secs, self.config.runtime.enforce_interval_secs
        );

        loop {
            tokio::select! {
                _ = metrics_timer.tick() => {
                    self.metrics_tick();
                }
                _ = enforce_timer.tick() => {
                    self.enforce_tick();
                }
            }
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
