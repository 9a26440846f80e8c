use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory name used for per-project state when no data dir is given.
pub const DEFAULT_DATA_DIR_NAME: &str = ".srcbert";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The SRCBERT_DATA_DIR environment variable
    /// 3. A `.srcbert` directory inside the indexed tree
    pub fn resolve(explicit: Option<&Path>, tree_root: &Path) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("SRCBERT_DATA_DIR") {
            PathBuf::from(val)
        } else {
            tree_root.join(DEFAULT_DATA_DIR_NAME)
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Advisory lock guarding the collection directory. Never removed.
    pub fn store_lock(&self) -> PathBuf {
        self.root.join("store.lock")
    }

    pub fn collection_dir(&self) -> PathBuf {
        self.root.join("collection")
    }
}
