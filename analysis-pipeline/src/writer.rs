use chrono::Local;
use serde::Serialize;
use spotter_core::CoreError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Serializes run output to timestamped JSON files in a results directory.
/// One instance per filename family (raw fetches, analyzed records).
#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
    prefix: String,
}

impl ResultWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Write `records` as a pretty-printed JSON array to
    /// `<prefix>_<YYYYMMDD_HHMMSS>.json`, creating the directory if needed.
    /// An unwritable destination is fatal and surfaces to the caller.
    pub fn write<T: Serialize>(&self, records: &[T]) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(&self.dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("{}_{}.json", self.prefix, timestamp));

        let serialized = serde_json::to_string_pretty(records)?;
        fs::write(&path, serialized)?;

        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
