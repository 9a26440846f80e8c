//! Incremental indexing controller.
//!
//! Owns the manifest and the vector collection and keeps them coupled: a
//! manifest record exists for a path exactly when the collection holds that
//! path's chunks `0..chunks`. Scans and single-file updates never return
//! per-file errors; failures are logged and reported to the progress sink.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chunk_id::{ChunkId, ids_in_range},
    config::Settings,
    embedding::Embedder,
    error::{Error, Result},
    ignore_rules::IgnoreRules,
    incremental::plan_scan,
    manifest::{FileRecord, Manifest},
    progress::ProgressSink,
    reranker::Reranker,
    search::{self, SearchHit, SearchParams},
    store_lock::StoreLock,
    vector_store::{self, ChunkDoc, CollectionSchema, LocalStore, VectorStore},
    walker::{Fingerprint, collect_files},
};

/// Chunks per store write.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Files indexed between manifest flushes during a scan.
pub const MANIFEST_FLUSH_INTERVAL: usize = 10;

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunks: usize },
    /// Fingerprint matches the manifest; nothing to do.
    Unchanged,
    /// Ineligible, unreadable, or produced no chunks.
    Skipped,
    /// Embedding or storage failed; left eligible for retry.
    Failed,
    /// Chunks and manifest record removed.
    Removed,
}

/// Counts from one full scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub indexed: usize,
    pub failed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub removed: usize,
    pub chunks: usize,
    /// The scan stopped early; the remaining files stay stale.
    pub cancelled: bool,
}

/// Collection-level figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_vectors: usize,
    pub backend: &'static str,
    pub indexed_files: usize,
    pub index_size_mb: f64,
}

pub struct Indexer {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    progress: Arc<dyn ProgressSink>,
    schema: CollectionSchema,
    rules: IgnoreRules,
    store: RwLock<Option<Arc<LocalStore>>>,
    manifest: Mutex<Manifest>,
    /// Serializes full scans and rebuilds.
    scan_lock: Mutex<()>,
    _lock: StoreLock,
}

impl Indexer {
    /// Take ownership of the data directory and open a collection that
    /// matches the embedder.
    ///
    /// A collection whose recorded provider, model, or dimension differs
    /// from the embedder's, or whose metadata or database cannot be read,
    /// is destroyed and recreated empty, and the manifest is cleared with
    /// it.
    pub fn open(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let data_dir = &settings.data_dir;
        let lock = StoreLock::acquire(&data_dir.store_lock())?;
        debug!("holding store lock {}", lock.path().display());

        let schema = CollectionSchema {
            provider: embedder.provider().to_string(),
            model: embedder.model().to_string(),
            dimension: embedder.dimension()?,
        };

        let mut manifest = Manifest::load(&data_dir.manifest());
        let store = open_compatible(
            &data_dir.collection_dir(),
            &schema,
            &mut manifest,
        )?;

        let rules = IgnoreRules::new(&settings.root).excluding(data_dir.root());

        info!(
            "indexer ready: {} files in manifest, {} / {} (dim {})",
            manifest.len(),
            schema.provider,
            schema.model,
            schema.dimension
        );

        Ok(Self {
            settings,
            embedder,
            reranker,
            progress,
            schema,
            rules,
            store: RwLock::new(Some(Arc::new(store))),
            manifest: Mutex::new(manifest),
            scan_lock: Mutex::new(()),
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    fn store(&self) -> Option<Arc<LocalStore>> {
        self.store.read().ok().and_then(|guard| guard.clone())
    }

    fn manifest(&self) -> Result<MutexGuard<'_, Manifest>> {
        self.manifest
            .lock()
            .map_err(|_| Error::Config("manifest lock poisoned".to_string()))
    }

    fn save_manifest(&self) {
        let result = self.manifest().and_then(|m| m.save());
        if let Err(e) = result {
            warn!("failed to save manifest: {e}");
        }
    }

    fn index_size_mb(&self) -> f64 {
        let bytes =
            LocalStore::size_on_disk(&self.settings.data_dir.collection_dir());
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// Resolve `path` against the root and render the manifest key.
    fn key_for(&self, path: &Path) -> (PathBuf, String) {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.root.join(path)
        };
        let key = path.to_string_lossy().to_string();
        (path, key)
    }

    /// Scan the tree and bring the collection up to date.
    ///
    /// Only new or changed files are embedded. Manifest entries whose file
    /// is gone or no longer eligible are purged. Only one scan runs at a
    /// time; callers queue behind the running one.
    pub fn index_directory(&self) -> ScanSummary {
        self.index_directory_until(&CancellationToken::new())
    }

    /// Like [`index_directory`](Self::index_directory), but stops between
    /// files once `cancel` fires. Files already indexed are kept.
    pub fn index_directory_until(
        &self,
        cancel: &CancellationToken,
    ) -> ScanSummary {
        let Ok(_scan) = self.scan_lock.lock() else {
            error!("scan lock poisoned");
            return ScanSummary::default();
        };
        self.scan(cancel)
    }

    fn scan(&self, cancel: &CancellationToken) -> ScanSummary {
        let collected = match collect_files(&self.rules, &self.settings.root) {
            Ok(collected) => collected,
            Err(e) => {
                error!("cannot walk {}: {e}", self.settings.root.display());
                return ScanSummary::default();
            }
        };

        let plan = match self.manifest() {
            Ok(manifest) => plan_scan(&manifest, &collected.files),
            Err(e) => {
                error!("{e}");
                return ScanSummary::default();
            }
        };

        let mut summary = ScanSummary {
            unchanged: plan.unchanged,
            skipped: collected.skipped,
            ..ScanSummary::default()
        };

        for path in &plan.removed {
            if self.purge(path) {
                summary.removed += 1;
            }
        }
        if summary.removed > 0 {
            info!("purged {} files no longer in the tree", summary.removed);
        }

        self.progress
            .scan_started(plan.to_index.len(), collected.skipped);
        info!(
            "starting scan: {} to index, {} unchanged, {} filtered",
            plan.to_index.len(),
            plan.unchanged,
            collected.skipped
        );

        if plan.to_index.is_empty() {
            if summary.removed > 0 {
                self.save_manifest();
            }
            let (files, chunks) = match self.manifest() {
                Ok(m) => (m.len(), m.total_chunks()),
                Err(_) => (0, 0),
            };
            self.progress.totals(collected.files.len(), files, chunks);
            let size_mb = self.index_size_mb();
            self.progress.scan_finished(size_mb);
            info!(
                "index up to date: {files} files, {chunks} chunks, {size_mb:.2} MB"
            );
            return summary;
        }

        for (i, file) in plan.to_index.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "scan cancelled with {} files left",
                    plan.to_index.len() - i
                );
                summary.cancelled = true;
                break;
            }
            match self.index_path(&file.absolute_path) {
                FileOutcome::Indexed { chunks } => {
                    summary.indexed += 1;
                    summary.chunks += chunks;
                }
                FileOutcome::Failed => summary.failed += 1,
                FileOutcome::Removed => summary.removed += 1,
                FileOutcome::Skipped | FileOutcome::Unchanged => {
                    summary.skipped += 1;
                }
            }
            if (i + 1) % MANIFEST_FLUSH_INTERVAL == 0 {
                self.save_manifest();
            }
        }

        self.save_manifest();
        let size_mb = self.index_size_mb();
        self.progress.scan_finished(size_mb);
        info!(
            "finished scan: indexed {}/{} files, {} chunks, {} failed, {size_mb:.2} MB",
            summary.indexed,
            plan.to_index.len(),
            summary.chunks,
            summary.failed
        );
        summary
    }

    /// Index one file now, outside any scan, if its fingerprint moved.
    pub fn index_file(&self, path: &Path) -> FileOutcome {
        let (path, key) = self.key_for(path);

        if let Ok(fingerprint) = Fingerprint::of(&path)
            && let Ok(manifest) = self.manifest()
            && !manifest.needs_reindex(&key, &fingerprint)
        {
            debug!("unchanged: {}", path.display());
            return FileOutcome::Unchanged;
        }

        let outcome = self.index_path(&path);
        if outcome != FileOutcome::Skipped {
            self.save_manifest();
        }
        outcome
    }

    /// Drop a file's chunks and manifest record.
    pub fn forget_file(&self, path: &Path) -> FileOutcome {
        let (_, key) = self.key_for(path);
        if self.purge(&key) {
            self.save_manifest();
            info!("removed {key} from the index");
            FileOutcome::Removed
        } else {
            FileOutcome::Skipped
        }
    }

    /// React to a change-feed event for `path`.
    pub fn sync_path(&self, path: &Path) -> FileOutcome {
        let (path, _) = self.key_for(path);
        if path.is_file() {
            self.index_file(&path)
        } else if path.exists() {
            FileOutcome::Skipped
        } else {
            self.forget_file(&path)
        }
    }

    /// Destroy the collection and manifest together, recreate them empty,
    /// and run a full scan.
    pub fn rebuild(&self) -> Result<ScanSummary> {
        self.rebuild_until(&CancellationToken::new())
    }

    /// [`rebuild`](Self::rebuild) whose scan stops once `cancel` fires.
    pub fn rebuild_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let _scan = self
            .scan_lock
            .lock()
            .map_err(|_| Error::Config("scan lock poisoned".to_string()))?;

        info!("rebuilding index from scratch");
        {
            let mut manifest = self.manifest()?;
            manifest.clear();
            manifest.save()?;
        }

        let dir = self.settings.data_dir.collection_dir();
        {
            let mut slot = self
                .store
                .write()
                .map_err(|_| Error::Config("store lock poisoned".to_string()))?;
            slot.take();
            LocalStore::destroy(&dir)?;
            let store = LocalStore::open_or_create(&dir, &self.schema)?;
            *slot = Some(Arc::new(store));
        }

        Ok(self.scan(cancel))
    }

    /// Run the retrieval pipeline. Never fails; see [`search::execute_search`].
    pub fn search(&self, query: &str, limit: usize) -> Vec<String> {
        self.search_hits(&SearchParams::new(query, limit))
            .iter()
            .map(SearchHit::formatted)
            .collect()
    }

    pub fn search_hits(&self, params: &SearchParams) -> Vec<SearchHit> {
        let Some(store) = self.store() else {
            return Vec::new();
        };
        let reranker = if self.settings.rerank {
            self.reranker.as_deref()
        } else {
            None
        };
        search::execute_search(
            params,
            self.embedder.as_ref(),
            store.as_ref(),
            reranker,
        )
    }

    pub fn stats(&self) -> IndexStats {
        let total_vectors = self
            .store()
            .map(|store| match store.count() {
                Ok(n) => n,
                Err(e) => {
                    warn!("cannot count vectors: {e}");
                    0
                }
            })
            .unwrap_or(0);
        let indexed_files = self.manifest().map(|m| m.len()).unwrap_or(0);

        IndexStats {
            total_vectors,
            backend: vector_store::BACKEND,
            indexed_files,
            index_size_mb: self.index_size_mb(),
        }
    }

    /// Chunk, embed, and store one file, then record it.
    fn index_path(&self, path: &Path) -> FileOutcome {
        let key = path.to_string_lossy().to_string();

        if let Some(reason) = self.rules.should_index(path) {
            debug!("skip {}: {reason}", path.display());
            // A file that became ineligible must not keep stale chunks.
            if self.purge(&key) {
                return FileOutcome::Removed;
            }
            return FileOutcome::Skipped;
        }

        let fingerprint = match Fingerprint::of(path) {
            Ok(fp) => fp,
            Err(e) => {
                debug!("cannot stat {}: {e}", path.display());
                return FileOutcome::Skipped;
            }
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("cannot read {}: {e}", path.display());
                return FileOutcome::Skipped;
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| key.clone());

        let (chunks, dropped) = self.settings.chunking.split(&text);
        if chunks.is_empty() {
            debug!("no chunks in {}", path.display());
            return FileOutcome::Skipped;
        }
        if dropped > 0 {
            warn!(
                "capping {name} from {} to {} chunks",
                chunks.len() + dropped,
                chunks.len()
            );
        }

        self.progress.file_started(&name);

        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let vectors = match self.embedder.embed(&texts) {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                error!(
                    "embedding {name}: got {} vectors for {} chunks",
                    v.len(),
                    texts.len()
                );
                self.progress.file_failed();
                return FileOutcome::Failed;
            }
            Err(e) => {
                error!("embedding {name} failed: {e}");
                self.progress.file_failed();
                return FileOutcome::Failed;
            }
        };

        let Some(store) = self.store() else {
            self.progress.file_failed();
            return FileOutcome::Failed;
        };

        let count = texts.len();
        let docs: Vec<ChunkDoc> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (text, vector))| ChunkDoc {
                id: ChunkId::new(&key, ordinal).into_string(),
                file_path: key.clone(),
                text,
                vector,
            })
            .collect();

        let previous = match self.manifest() {
            Ok(manifest) => manifest.get(&key).map(|r| r.chunks).unwrap_or(0),
            Err(_) => {
                self.progress.file_failed();
                return FileOutcome::Failed;
            }
        };

        for (i, batch) in docs.chunks(UPSERT_BATCH_SIZE).enumerate() {
            if let Err(e) = store.upsert(batch) {
                error!("storing {name} failed: {e}");
                let written = ((i + 1) * UPSERT_BATCH_SIZE).min(count);
                let extent = previous.max(written);
                self.discard_partial(store.as_ref(), &key, extent);
                self.progress.file_failed();
                return FileOutcome::Failed;
            }
        }

        let Ok(mut manifest) = self.manifest() else {
            self.progress.file_failed();
            return FileOutcome::Failed;
        };

        if previous > count
            && let Err(e) = store.delete(&ids_in_range(&key, count, previous))
        {
            // Keep the old record so the file is retried and the trailing
            // chunks are not orphaned.
            error!("removing trailing chunks of {name} failed: {e}");
            self.progress.file_failed();
            return FileOutcome::Failed;
        }

        manifest.insert(
            key,
            FileRecord {
                fingerprint,
                chunks: count,
            },
        );
        drop(manifest);

        self.progress.file_indexed(count);
        info!("indexed {name}: {count} chunks");
        FileOutcome::Indexed { chunks: count }
    }

    /// Remove whatever a failed write left behind for `key`.
    ///
    /// `extent` covers both the chunks written before the failure and the
    /// ones recorded for the previous version. On success the record goes
    /// too, so the next scan sees the file as new. If the delete fails, a
    /// record no file can match keeps the chunks reachable for the next
    /// attempt or purge.
    fn discard_partial(&self, store: &LocalStore, key: &str, extent: usize) {
        let Ok(mut manifest) = self.manifest() else {
            return;
        };
        match store.delete(&ids_in_range(key, 0, extent)) {
            Ok(()) => {
                manifest.remove(key);
                debug!("discarded {extent} partial chunks of {key}");
            }
            Err(e) => {
                warn!("cannot discard partial chunks of {key}: {e}");
                manifest.insert(
                    key.to_string(),
                    FileRecord {
                        fingerprint: Fingerprint {
                            mtime: 0.0,
                            size: 0,
                        },
                        chunks: extent,
                    },
                );
            }
        }
    }

    /// Delete every chunk recorded for `key` and drop its record.
    ///
    /// Returns false when there was no record or the delete failed.
    fn purge(&self, key: &str) -> bool {
        let Ok(mut manifest) = self.manifest() else {
            return false;
        };
        let Some(record) = manifest.get(key).copied() else {
            return false;
        };
        let Some(store) = self.store() else {
            return false;
        };

        match store.delete(&ids_in_range(key, 0, record.chunks)) {
            Ok(()) => {
                manifest.remove(key);
                debug!("purged {} chunks of {key}", record.chunks);
                true
            }
            Err(e) => {
                warn!("cannot purge {key}: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("root", &self.settings.root)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Open the collection in `dir`, rebuilding it (and clearing `manifest`)
/// when it does not match `schema` or cannot be opened.
fn open_compatible(
    dir: &Path,
    schema: &CollectionSchema,
    manifest: &mut Manifest,
) -> Result<LocalStore> {
    let mismatch = match LocalStore::read_meta(dir) {
        Ok(Some(meta)) if meta == *schema => None,
        Ok(Some(meta)) => Some(format!(
            "collection was built with {} / {} (dim {}), now {} / {} (dim {})",
            meta.provider,
            meta.model,
            meta.dimension,
            schema.provider,
            schema.model,
            schema.dimension
        )),
        Ok(None) if dir_has_entries(dir) => {
            Some("collection has no metadata".to_string())
        }
        Ok(None) => None,
        Err(e) => Some(format!("collection metadata unreadable: {e}")),
    };

    if let Some(reason) = mismatch {
        warn!("{reason}; recreating collection");
        reset(dir, manifest)?;
    } else if !dir.exists() && !manifest.is_empty() {
        // A fresh collection holds nothing the manifest could describe.
        manifest.clear();
        manifest.save()?;
    }

    match LocalStore::open_or_create(dir, schema) {
        Ok(store) => Ok(store),
        Err(e) => {
            warn!("failed to open collection: {e}; recreating from scratch");
            reset(dir, manifest)?;
            LocalStore::open_or_create(dir, schema)
        }
    }
}

fn reset(dir: &Path, manifest: &mut Manifest) -> Result<()> {
    LocalStore::destroy(dir)?;
    manifest.clear();
    manifest.save()?;
    info!("manifest cleared with the collection");
    Ok(())
}

fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
