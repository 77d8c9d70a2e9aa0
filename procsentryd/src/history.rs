use crate::error::{StoreError, ensure_parent};
use crate::types::HistoryRecord;
use log::{debug, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Capped, FIFO-trimmed CSV time series of system-wide metrics.
///
/// Every append rewrites the whole file through a temporary sibling and a
/// rename, so readers never observe a half-written file and the file never
/// holds more than `capacity` rows.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All stored rows, oldest first. Rows that fail to parse are skipped.
    pub fn try_load(&self) -> Result<VecDeque<HistoryRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(VecDeque::new());
        }

        let mut reader =
            csv::Reader::from_path(&self.path).map_err(|err| StoreError::csv(&self.path, err))?;
        let mut records = VecDeque::new();
        for row in reader.deserialize::<HistoryRecord>() {
            match row {
                Ok(record) => records.push_back(record),
                Err(err) => debug!("[history] skipping malformed row: {err}"),
            }
        }
        Ok(records)
    }

    pub fn try_append(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut records = self.try_load()?;
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }
        self.write_all(&records)
    }

    /// Fail-soft append; returns whether the row was persisted.
    pub fn append(&self, record: &HistoryRecord) -> bool {
        match self.try_append(record) {
            Ok(()) => true,
            Err(err) => {
                warn!("[history] append failed: {err}");
                false
            }
        }
    }

    /// The most recent `n` rows, most recent last.
    pub fn try_tail(&self, n: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let records = self.try_load()?;
        let skip = records.len().saturating_sub(n);
        Ok(records.into_iter().skip(skip).collect())
    }

    pub fn tail(&self, n: usize) -> Vec<HistoryRecord> {
        self.try_tail(n).unwrap_or_else(|err| {
            warn!("[history] read failed: {err}");
            Vec::new()
        })
    }

    pub fn len(&self) -> usize {
        self.try_load().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_all(&self, records: &VecDeque<HistoryRecord>) -> Result<(), StoreError> {
        ensure_parent(&self.path)?;
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer =
                csv::Writer::from_path(&tmp).map_err(|err| StoreError::csv(&tmp, err))?;
            for record in records {
                writer
                    .serialize(record)
                    .map_err(|err| StoreError::csv(&tmp, err))?;
            }
            writer.flush().map_err(|err| StoreError::io(&tmp, err))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|err| StoreError::io(&self.path, err))
    }
}
