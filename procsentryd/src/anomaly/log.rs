use crate::error::{StoreError, ensure_parent};
use crate::types::AnomalyRecord;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_RECENT: usize = 20;

/// Append-only text log of flagged processes, one line per record:
/// `HH:MM:SS | name (PID pid) | CPU:x% RAM:yMB Score:z`.
#[derive(Debug, Clone)]
pub struct AnomalyLog {
    path: PathBuf,
}

/// One parsed log line as handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyLogEntry {
    pub time: String,
    pub process: String,
    pub detail: String,
}

impl AnomalyLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(record: &AnomalyRecord) -> String {
        format!(
            "{} | {} (PID {}) | CPU:{:.1}% RAM:{:.0}MB Score:{:.4}",
            record.detected_at, record.name, record.pid, record.cpu, record.memory_mb, record.score
        )
    }

    pub fn try_append(&self, records: &[AnomalyRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| StoreError::io(&self.path, err))?;

        let mut buf = String::new();
        for record in records {
            buf.push_str(&Self::format_line(record));
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .map_err(|err| StoreError::io(&self.path, err))
    }

    pub fn append(&self, records: &[AnomalyRecord]) {
        if let Err(err) = self.try_append(records) {
            warn!("[anomaly] log append failed: {err}");
        }
    }

    /// The last `n` well-formed lines, oldest first.
    pub fn try_recent(&self, n: usize) -> Result<Vec<AnomalyLogEntry>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|err| StoreError::io(&self.path, err))?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines[skip..].iter().filter_map(|l| parse_line(l)).collect())
    }

    pub fn recent(&self, n: usize) -> Vec<AnomalyLogEntry> {
        self.try_recent(n).unwrap_or_else(|err| {
            warn!("[anomaly] log read failed: {err}");
            Vec::new()
        })
    }
}

fn parse_line(line: &str) -> Option<AnomalyLogEntry> {
    let mut parts = line.splitn(3, '|').map(str::trim);
    let time = parts.next()?;
    let process = parts.next()?;
    let detail = parts.next()?;
    if time.is_empty() || process.is_empty() {
        return None;
    }
    Some(AnomalyLogEntry {
        time: time.to_string(),
        process: process.to_string(),
        detail: detail.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, name: &str) -> AnomalyRecord {
        AnomalyRecord {
            detected_at: "12:00:01".to_string(),
            pid,
            name: name.to_string(),
            cpu: 97.3,
            memory_mb: 2048.4,
            score: 0.1234567,
        }
    }

    #[test]
    fn line_format() {
        assert_eq!(
            AnomalyLog::format_line(&record(42, "miner")),
            "12:00:01 | miner (PID 42) | CPU:97.3% RAM:2048MB Score:0.1235"
        );
    }

    #[test]
    fn recent_returns_last_lines_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnomalyLog::new(dir.path().join("anomalies.log"));
        let records: Vec<AnomalyRecord> = (0..30).map(|i| record(i, "proc")).collect();
        log.try_append(&records).unwrap();

        let recent = log.recent(DEFAULT_RECENT);
        assert_eq!(recent.len(), 20);
        assert_eq!(recent[0].process, "proc (PID 10)");
        assert_eq!(recent[19].process, "proc (PID 29)");
        assert!(recent[0].detail.starts_with("CPU:"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomalies.log");
        std::fs::write(&path, "garbage\n10:00:00 | a (PID 1) | CPU:1.0% RAM:1MB\n\n").unwrap();

        let entries = AnomalyLog::new(&path).recent(5);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].time, "10:00:00");
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AnomalyLog::new(dir.path().join("none.log"));
        assert!(log.recent(10).is_empty());
    }
}
