//! srcbert - incremental semantic indexing of a local directory tree.
//!
//! srcbert walks a tree, splits eligible text files into overlapping chunks,
//! embeds them with a local [ColBERT](https://github.com/stanford-futuredata/ColBERT)
//! model or an OpenAI-compatible API, and keeps the vectors in a
//! [redb](https://github.com/cberner/redb) collection. A manifest of file
//! fingerprints makes rescans cheap, and a filesystem watcher keeps the
//! index current while the MCP server runs.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use srcbert::{Indexer, Settings};
//! use srcbert::chunking::ChunkingConfig;
//! use srcbert::config::ProviderConfig;
//! use srcbert::embedding::EmbedProvider;
//! use srcbert::progress::NoProgress;
//!
//! let settings = Settings::resolve(
//!     std::path::Path::new("."),
//!     None,
//!     ProviderConfig::local(None),
//!     ChunkingConfig::default(),
//!     false,
//! )
//! .unwrap();
//! let embedder = Arc::new(EmbedProvider::from_config(&settings.provider));
//! let indexer = Indexer::open(settings, embedder, None, Arc::new(NoProgress))
//!     .unwrap();
//!
//! let summary = indexer.index_directory();
//! println!("indexed {} files", summary.indexed);
//!
//! for excerpt in indexer.search("how is the server deployed?", 5) {
//!     println!("{excerpt}");
//! }
//! ```

pub mod chunk_id;
pub mod chunking;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod ignore_rules;
pub mod incremental;
pub mod indexer;
pub mod manifest;
pub mod mcp;
pub mod model_manager;
pub mod progress;
pub mod reranker;
pub mod search;
pub mod service;
pub mod store_lock;
pub mod vector_store;
pub mod walker;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use chunk_id::ChunkId;
pub use config::Settings;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use indexer::Indexer;
pub use model_manager::ModelManager;
pub use service::Service;
