use std::path::{Path, PathBuf};

use crate::{
    chunking::ChunkingConfig,
    data_dir::DataDir,
    error::{Error, Result},
    model_manager::DEFAULT_MODEL_ID,
};

pub const DEFAULT_REMOTE_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Which embedding backend to build, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Local {
        model_id: String,
    },
    Remote {
        base_url: String,
        model: String,
        api_key: String,
        /// Overrides the length derived from the model name.
        dimension: Option<usize>,
    },
}

impl ProviderConfig {
    pub fn local(model: Option<String>) -> Self {
        Self::Local {
            model_id: model.unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
        }
    }

    /// A remote provider needs credentials; their absence is fatal.
    pub fn remote(
        base_url: Option<String>,
        model: Option<String>,
        api_key: Option<String>,
        dimension: Option<usize>,
    ) -> Result<Self> {
        let api_key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            Error::Config(
                "the openai provider needs an API key (--api-key or OPENAI_API_KEY)"
                    .to_string(),
            )
        })?;
        if dimension == Some(0) {
            return Err(Error::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }

        Ok(Self::Remote {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_REMOTE_MODEL.to_string()),
            api_key,
            dimension,
        })
    }
}

/// Everything the indexer needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Canonical root of the indexed tree.
    pub root: PathBuf,
    pub data_dir: DataDir,
    pub provider: ProviderConfig,
    pub chunking: ChunkingConfig,
    pub rerank: bool,
}

impl Settings {
    pub fn resolve(
        root: &Path,
        data_dir: Option<&Path>,
        provider: ProviderConfig,
        chunking: ChunkingConfig,
        rerank: bool,
    ) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("cannot open root {}: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "root {} is not a directory",
                root.display()
            )));
        }
        if chunking.chunk_size == 0 {
            return Err(Error::Config(
                "chunk size must be positive".to_string(),
            ));
        }

        let data_dir = DataDir::resolve(data_dir, &root)?;
        Ok(Self {
            root,
            data_dir,
            provider,
            chunking,
            rerank,
        })
    }
}
