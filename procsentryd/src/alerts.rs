use crate::error::{StoreError, ensure_parent};
use crate::types::current_epoch_secs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: u64,
    pub alert: String,
}

/// Bounded ring of enforcement alerts, mirrored to a JSON-lines file.
pub struct AlertStore {
    inner: Mutex<VecDeque<AlertRecord>>,
    capacity: usize,
    file_path: Option<PathBuf>,
}

impl AlertStore {
    pub fn new(capacity: usize, file_path: Option<PathBuf>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            file_path,
        }
    }

    pub fn record_all(&self, alerts: &[String]) {
        for alert in alerts {
            self.record(alert.clone());
        }
    }

    pub fn record(&self, alert: String) {
        let record = AlertRecord {
            timestamp: current_epoch_secs(),
            alert,
        };

        {
            let mut inner = self.lock();
            if inner.len() == self.capacity {
                inner.pop_front();
            }
            inner.push_back(record.clone());
        }

        if let Some(path) = &self.file_path
            && let Err(err) = append_record(path, &record)
        {
            warn!("[alerts] failed to persist alert: {err}");
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        if limit == 0 {
            return Vec::new();
        }
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AlertRecord>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn append_record(path: &Path, record: &AlertRecord) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let mut line = serde_json::to_string(record).map_err(|err| StoreError::json(path, err))?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| StoreError::io(path, err))?;
    file.write_all(line.as_bytes())
        .map_err(|err| StoreError::io(path, err))
}
