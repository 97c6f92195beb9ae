use crate::fingerprint::Fingerprint;
use chrono::Utc;
use spotter_core::{CacheEntry, CacheError, Classification, CoreError};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Content-addressed store of classifications, persisted as a single JSON
/// object keyed by fingerprint. Keys serialize in sorted order, so an
/// unmodified load/save cycle reproduces the file byte for byte.
#[derive(Debug)]
pub struct ClassificationCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<Fingerprint, CacheEntry>>,
}

impl ClassificationCache {
    /// Read persisted entries from `path`. A missing file is an empty cache.
    /// A corrupt or unreadable file is logged and degraded to an empty cache;
    /// it never aborts the run.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<Fingerprint, CacheEntry>>(&raw) {
                Ok(map) => {
                    debug!("Loaded {} cached classifications from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    let corrupt = CacheError::Corrupt {
                        path: path.display().to_string(),
                        details: e.to_string(),
                    };
                    warn!("{corrupt}; starting with an empty cache");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                let unreadable = CacheError::Unreadable {
                    path: path.display().to_string(),
                    details: e.to_string(),
                };
                warn!("{unreadable}; starting with an empty cache");
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Pure lookup; no side effects.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Classification> {
        let entries = self.entries.lock().expect("cache mutex poisoned");
        entries.get(fingerprint).map(|e| e.classification.clone())
    }

    /// Insert-if-absent under the lock. Returns `false` without overwriting
    /// when an entry already exists for this fingerprint (first-write-wins).
    pub fn put(&self, fingerprint: Fingerprint, classification: Classification) -> bool {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.entry(fingerprint) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    classification,
                    cached_at: Utc::now(),
                });
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Persist all entries. Writes to a temporary file in the destination
    /// directory, then atomically renames over the cache file, so an
    /// interrupted save never leaves a partial file behind.
    pub fn save(&self) -> Result<(), CoreError> {
        let serialized = {
            let entries = self.entries.lock().expect("cache mutex poisoned");
            serde_json::to_string_pretty(&*entries)?
        };

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!("Saved {} classifications to {}", self.len(), self.path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
