use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{DriftError, Result};
use crate::models::DriftRecord;

pub const CSV_HEADER: [&str; 6] = ["start", "end", "feature", "score", "threshold", "is_drifted"];

/// Append-only, insertion-ordered store of drift records.
pub trait DriftLog {
    /// Adds `records` after everything already stored, in the given order.
    fn append(&mut self, records: &[DriftRecord]) -> Result<()>;

    /// Every record in insertion order. `LogNotFound` if the log was never
    /// created or written.
    fn load(&self) -> Result<Vec<DriftRecord>>;

    /// Records whose closed `[window_start, window_end]` interval intersects
    /// `[start, end]`, in insertion order.
    fn query_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DriftRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|record| record.overlaps(start, end))
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryDriftLog {
    records: Vec<DriftRecord>,
    written: bool,
}

impl MemoryDriftLog {
    pub fn records(&self) -> &[DriftRecord] {
        &self.records
    }
}

impl DriftLog for MemoryDriftLog {
    fn append(&mut self, records: &[DriftRecord]) -> Result<()> {
        self.records.extend_from_slice(records);
        self.written = true;
        Ok(())
    }

    fn load(&self) -> Result<Vec<DriftRecord>> {
        if !self.written {
            return Err(DriftError::LogNotFound("in-memory log".to_string()));
        }
        Ok(self.records.clone())
    }
}

/// CSV-backed log. Existing rows are never rewritten; each append opens
/// the file in append mode and flushes before returning.
#[derive(Debug, Clone)]
pub struct CsvDriftLog {
    path: PathBuf,
}

impl CsvDriftLog {
    /// Starts a fresh log at `path`, replacing any previous file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        debug!(path = %path.display(), "created drift log");
        Ok(Self { path })
    }

    /// Attaches to `path` without touching it; the file may not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DriftLog for CsvDriftLog {
    fn append(&mut self, records: &[DriftRecord]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(CSV_HEADER)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        debug!(path = %self.path.display(), appended = records.len(), "appended drift records");
        Ok(())
    }

    fn load(&self) -> Result<Vec<DriftRecord>> {
        if !self.path.exists() {
            return Err(DriftError::LogNotFound(self.path.display().to_string()));
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut records = Vec::new();
        for row in reader.deserialize::<DriftRecord>() {
            records.push(row?);
        }
        Ok(records)
    }
}
