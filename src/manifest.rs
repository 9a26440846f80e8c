use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::Result, walker::Fingerprint};

/// What the store holds for one file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub fingerprint: Fingerprint,
    /// Number of chunks written; ids for ordinals `0..chunks` exist.
    pub chunks: usize,
}

/// Persistent map from absolute file path to its last indexed state.
///
/// Stored as a single JSON object. A missing or unreadable file loads as an
/// empty manifest, which simply causes a full re-index.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    records: BTreeMap<String, FileRecord>,
}

impl Manifest {
    pub fn load(path: &Path) -> Self {
        let records = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        "manifest at {} is unreadable ({e}); starting fresh",
                        path.display()
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                BTreeMap::new()
            }
            Err(e) => {
                warn!("cannot read manifest {}: {e}", path.display());
                BTreeMap::new()
            }
        };

        debug!("loaded manifest with {} entries", records.len());
        Self {
            path: path.to_path_buf(),
            records,
        }
    }

    /// Write the manifest to disk via a temporary file and rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, file_path: &str) -> Option<&FileRecord> {
        self.records.get(file_path)
    }

    pub fn insert(&mut self, file_path: String, record: FileRecord) {
        self.records.insert(file_path, record);
    }

    pub fn remove(&mut self, file_path: &str) -> Option<FileRecord> {
        self.records.remove(file_path)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn total_chunks(&self) -> usize {
        self.records.values().map(|r| r.chunks).sum()
    }

    /// A file needs re-indexing when it is unknown or its fingerprint moved.
    pub fn needs_reindex(
        &self,
        file_path: &str,
        current: &Fingerprint,
    ) -> bool {
        self.records
            .get(file_path)
            .is_none_or(|record| record.fingerprint != *current)
    }
}
