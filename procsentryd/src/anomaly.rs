//! Per-tick outlier scoring of the process table plus the memory-leak rule.

pub mod forest;
pub mod log;

use crate::config::DetectorConfig;
use crate::types::{AnomalyRecord, LeakSeverity, LeakWarning, ProcessTable};
use ::log::{debug, info};
use forest::{IsolationForest, percentile};

pub use self::log::{AnomalyLog, AnomalyLogEntry, DEFAULT_RECENT};

const CRITICAL_LEAK_AGE_MIN: f64 = 3.0;
const CRITICAL_LEAK_MB: f64 = 1500.0;
const POSSIBLE_LEAK_AGE_MIN: f64 = 10.0;
const POSSIBLE_LEAK_MB: f64 = 800.0;

/// Fits a fresh isolation forest on every call; nothing is carried between
/// ticks. Flagged rows are always written to the anomaly log.
pub struct OutlierDetector {
    config: DetectorConfig,
    log: AnomalyLog,
}

impl OutlierDetector {
    pub fn new(config: DetectorConfig, log: AnomalyLog) -> Self {
        Self { config, log }
    }

    pub fn log(&self) -> &AnomalyLog {
        &self.log
    }

    /// Most anomalous first, at most `max_reported` records.
    pub fn detect(&self, table: &ProcessTable) -> Vec<AnomalyRecord> {
        let min_samples = self.config.min_samples.max(3);
        if table.len() < min_samples {
            debug!(
                "[anomaly] {} rows below minimum of {min_samples}, skipping",
                table.len()
            );
            return Vec::new();
        }

        let features: Vec<[f64; 6]> = table.iter().map(|r| r.features()).collect();
        let Some(forest) = IsolationForest::fit(&features, self.config.trees, self.config.seed)
        else {
            return Vec::new();
        };

        let scores: Vec<f64> = features.iter().map(|x| forest.score(x)).collect();
        let negated: Vec<f64> = scores.iter().map(|s| -s).collect();
        let threshold = percentile(&negated, self.config.contamination * 100.0);

        let detected_at = chrono::Local::now().format("%H:%M:%S").to_string();
        let mut flagged: Vec<AnomalyRecord> = table
            .iter()
            .zip(&scores)
            .filter(|(_, score)| -**score < threshold)
            .map(|(record, score)| AnomalyRecord {
                detected_at: detected_at.clone(),
                pid: record.pid,
                name: record.name.clone(),
                cpu: record.cpu,
                memory_mb: record.memory_mb,
                score: score + threshold,
            })
            .collect();
        flagged.sort_by(|a, b| b.score.total_cmp(&a.score));

        if !flagged.is_empty() {
            info!(
                "[anomaly] {} of {} processes flagged",
                flagged.len(),
                table.len()
            );
        }
        self.log.append(&flagged);

        flagged.truncate(self.config.max_reported);
        flagged
    }

    pub fn recent_anomalies(&self, n: usize) -> Vec<AnomalyLogEntry> {
        self.log.recent(n)
    }
}

/// Young processes with a large resident set. Critical takes precedence over
/// possible; each process yields at most one warning.
pub fn detect_memory_leak(table: &ProcessTable) -> Vec<LeakWarning> {
    table
        .iter()
        .filter_map(|record| {
            let (severity, warning) = if record.age_min < CRITICAL_LEAK_AGE_MIN
                && record.memory_mb > CRITICAL_LEAK_MB
            {
                (
                    LeakSeverity::Critical,
                    format!(
                        "CRITICAL LEAK: {:.0} MB in {:.1} min!",
                        record.memory_mb, record.age_min
                    ),
                )
            } else if record.age_min < POSSIBLE_LEAK_AGE_MIN && record.memory_mb > POSSIBLE_LEAK_MB
            {
                (
                    LeakSeverity::Possible,
                    format!(
                        "Possible leak: {:.0} MB in {:.1} min",
                        record.memory_mb, record.age_min
                    ),
                )
            } else {
                return None;
            };
            Some(LeakWarning {
                pid: record.pid,
                name: record.name.clone(),
                memory_mb: record.memory_mb,
                age_min: record.age_min,
                severity,
                warning,
            })
        })
        .collect()
}
