//! Persistence for stability records
//!
//! Records are keyed by the string form of a [`super::StabilityKey`]. The
//! whole map is loaded once at start and written back at the end of a cycle.

use super::StabilityRecord;
use dsync_common::Result;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Whole-map storage for stability records
pub trait StabilityStore: Send {
    /// Replace in-memory contents with persisted state.
    ///
    /// Missing or corrupt state yields an empty map, never an error.
    fn load(&mut self) -> Result<()>;

    /// Persist the whole map
    fn save(&mut self) -> Result<()>;

    fn get(&self, key: &str) -> Option<StabilityRecord>;

    fn put(&mut self, key: String, record: StabilityRecord);

    /// Returns whether a record was removed
    fn delete(&mut self, key: &str) -> bool;

    fn entries(&self) -> Vec<(String, StabilityRecord)>;

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store; `load`/`save` are no-ops
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, StabilityRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StabilityStore for MemoryStore {
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Option<StabilityRecord> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, key: String, record: StabilityRecord) {
        self.records.insert(key, record);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    fn entries(&self) -> Vec<(String, StabilityRecord)> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// JSON file store with atomic whole-file replacement
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: BTreeMap<String, StabilityRecord>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }
}

impl StabilityStore for JsonFileStore {
    fn load(&mut self) -> Result<()> {
        self.records.clear();

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stability state yet, starting cold");
                return Ok(());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Stability state unreadable, starting cold");
                return Ok(());
            }
        };

        match serde_json::from_str::<BTreeMap<String, StabilityRecord>>(&content) {
            Ok(records) => {
                debug!(path = %self.path.display(), records = records.len(), "Stability state loaded");
                self.records = records;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Stability state corrupt, starting cold");
            }
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.records)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), records = self.records.len(), "Stability state saved");
        Ok(())
    }

    fn get(&self, key: &str) -> Option<StabilityRecord> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, key: String, record: StabilityRecord) {
        self.records.insert(key, record);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    fn entries(&self) -> Vec<(String, StabilityRecord)> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
