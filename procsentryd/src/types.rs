use crate::collectors::gpu::GpuStats;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Host-wide metrics for one tick. Built fresh every snapshot and never
/// persisted whole; only [`HistoryRecord`] goes to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: u64,
    pub cpu_percent: f32,
    pub cpu_per_core: Vec<f32>,
    pub mem_percent: f32,
    pub mem_used_mb: f64,
    pub mem_available_mb: f64,
    pub mem_total_mb: f64,
    pub disk_percent: f32,
    pub disk_free_gb: f64,
    pub net_tx_bytes: u64,
    pub net_rx_bytes: u64,
    pub process_count: usize,
    pub boot_time: u64,
    /// `None` when no GPU tooling is available.
    pub gpu: Option<Vec<GpuStats>>,
}

/// One live OS process at snapshot time.
///
/// Every field has a zero/empty default so partially-read processes and
/// externally supplied rows stay usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub memory_mb: f64,
    pub threads: u64,
    pub ctx_switches: u64,
    pub age_min: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub parent: Option<u32>,
    pub status: String,
    pub user: Option<String>,
}

impl ProcessRecord {
    pub fn disk_read_mb(&self) -> f64 {
        self.disk_read_bytes as f64 / BYTES_PER_MB
    }

    pub fn disk_write_mb(&self) -> f64 {
        self.disk_write_bytes as f64 / BYTES_PER_MB
    }

    /// Detector features: cpu, memory_mb, threads, disk_read_mb,
    /// disk_write_mb, ctx_switches. Non-finite values become 0.
    pub fn features(&self) -> [f64; 6] {
        [
            f64::from(self.cpu),
            self.memory_mb,
            self.threads as f64,
            self.disk_read_mb(),
            self.disk_write_mb(),
            self.ctx_switches as f64,
        ]
        .map(|v| if v.is_finite() { v } else { 0.0 })
    }
}

/// Process rows of one tick, always ordered by descending memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessTable(Vec<ProcessRecord>);

impl ProcessTable {
    pub fn new(mut records: Vec<ProcessRecord>) -> Self {
        if records.len() > 1 {
            records.sort_by(|a, b| b.memory_mb.total_cmp(&a.memory_mb));
        }
        Self(records)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcessRecord> {
        self.0.iter()
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.0
    }

    /// Rows whose name contains `pattern`, ignoring case.
    pub fn matching<'a>(&'a self, pattern: &str) -> impl Iterator<Item = &'a ProcessRecord> + 'a {
        let needle = pattern.to_lowercase();
        self.0
            .iter()
            .filter(move |record| record.name.to_lowercase().contains(&needle))
    }
}

impl From<Vec<ProcessRecord>> for ProcessTable {
    fn from(records: Vec<ProcessRecord>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a ProcessTable {
    type Item = &'a ProcessRecord;
    type IntoIter = std::slice::Iter<'a, ProcessRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Stable row schema consumed by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub memory_mb: f64,
    pub threads: u64,
    pub age_min: f64,
    pub status: String,
    pub parent: Option<u32>,
}

impl From<&ProcessRecord> for ProcessRow {
    fn from(record: &ProcessRecord) -> Self {
        Self {
            pid: record.pid,
            name: record.name.clone(),
            cpu: record.cpu,
            memory_mb: record.memory_mb,
            threads: record.threads,
            age_min: record.age_min,
            status: record.status.clone(),
            parent: record.parent,
        }
    }
}

/// Reduced projection of a [`SystemSnapshot`] kept by the history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub time: String,
    pub cpu: f32,
    pub memory: f32,
    pub processes: usize,
}

impl HistoryRecord {
    pub fn from_snapshot(snapshot: &SystemSnapshot) -> Self {
        let time = chrono::DateTime::from_timestamp(snapshot.timestamp as i64, 0)
            .map(|dt| {
                dt.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        Self {
            time,
            cpu: snapshot.cpu_percent,
            memory: snapshot.mem_percent,
            processes: snapshot.process_count,
        }
    }
}

/// A process flagged by the outlier detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Local wall-clock time of detection, `HH:MM:SS`.
    pub detected_at: String,
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub memory_mb: f64,
    /// Larger means more anomalous; only the ordering is meaningful.
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeakSeverity {
    Critical,
    Possible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakWarning {
    pub pid: u32,
    pub name: String,
    pub memory_mb: f64,
    pub age_min: f64,
    pub severity: LeakSeverity,
    pub warning: String,
}

pub(crate) fn current_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
