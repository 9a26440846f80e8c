use std::path::{Path, PathBuf};

use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Name reported in stats for this storage engine.
pub const BACKEND: &str = "redb";

const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");

const DB_FILE: &str = "chunks.redb";
const META_FILE: &str = "meta.json";

/// Header size: path length, text length, and dimension, each a u32 LE.
const HEADER_SIZE: usize = 12;

/// Binds a collection to the embedding model that filled it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

/// One stored chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDoc {
    pub id: String,
    pub file_path: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A nearest-neighbor match.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Cosine similarity to the query vector.
    pub score: f32,
    pub id: String,
    pub file_path: String,
    pub text: String,
}

/// Upsert and query-by-vector over a collection of chunks.
///
/// Implementations must be safe to call from several threads at once.
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite chunks by id.
    fn upsert(&self, docs: &[ChunkDoc]) -> Result<()>;

    /// Remove chunks by id. Unknown ids are ignored.
    fn delete(&self, ids: &[String]) -> Result<()>;

    /// Return up to `top_k` chunks ordered by descending similarity.
    fn query_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Candidate>>;

    /// Number of stored chunks.
    fn count(&self) -> Result<usize>;
}

/// Embedded vector collection stored in a redb file with a JSON schema
/// sidecar.
///
/// Entry format, keyed by chunk id:
/// - 4 bytes: file path length P (u32 LE)
/// - 4 bytes: text length X (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - P bytes path, X bytes text (UTF-8)
/// - D * 4 bytes: f32 LE vector
///
/// Queries are exact: every stored vector is scored.
pub struct LocalStore {
    db: Database,
    dir: PathBuf,
    schema: CollectionSchema,
}

impl LocalStore {
    /// Open the collection in `dir`, creating it when absent.
    ///
    /// The schema sidecar is written after the database so a crash during
    /// creation leaves a directory without metadata, which
    /// [`read_meta`](Self::read_meta) callers treat as incompatible.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use srcbert::vector_store::{CollectionSchema, LocalStore, VectorStore};
    ///
    /// let schema = CollectionSchema {
    ///     provider: "local".to_string(),
    ///     model: "test".to_string(),
    ///     dimension: 4,
    /// };
    /// let store = LocalStore::open_or_create(tmp.path(), &schema).unwrap();
    /// assert_eq!(store.count().unwrap(), 0);
    /// ```
    pub fn open_or_create(
        dir: &Path,
        schema: &CollectionSchema,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db = Database::create(dir.join(DB_FILE))?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.commit()?;

        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            std::fs::write(&meta_path, serde_json::to_vec_pretty(schema)?)?;
            info!(
                "created collection at {} ({} / {}, dim {})",
                dir.display(),
                schema.provider,
                schema.model,
                schema.dimension
            );
        }

        Ok(Self {
            db,
            dir: dir.to_path_buf(),
            schema: schema.clone(),
        })
    }

    /// Read the schema sidecar. `Ok(None)` when there is none.
    pub fn read_meta(dir: &Path) -> Result<Option<CollectionSchema>> {
        match std::fs::read(dir.join(META_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the collection directory and everything in it.
    pub fn destroy(dir: &Path) -> Result<()> {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {
                debug!("destroyed collection at {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes used by the collection directory.
    pub fn size_on_disk(dir: &Path) -> u64 {
        fn walk(path: &Path) -> u64 {
            let Ok(entries) = std::fs::read_dir(path) else {
                return 0;
            };
            entries
                .filter_map(|e| e.ok())
                .map(|entry| match entry.metadata() {
                    Ok(meta) if meta.is_dir() => walk(&entry.path()),
                    Ok(meta) => meta.len(),
                    Err(_) => 0,
                })
                .sum()
        }
        walk(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.schema.dimension {
            return Err(Error::Embedding(format!(
                "vector has {} dimensions, collection expects {}",
                vector.len(),
                self.schema.dimension
            )));
        }
        Ok(())
    }
}

impl VectorStore for LocalStore {
    fn upsert(&self, docs: &[ChunkDoc]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        for doc in docs {
            self.check_dimension(&doc.vector)?;
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            for doc in docs {
                let path = doc.file_path.as_bytes();
                let text = doc.text.as_bytes();
                let vector: &[u8] = bytemuck::cast_slice(&doc.vector);
                let byte_len =
                    HEADER_SIZE + path.len() + text.len() + vector.len();

                let mut guard =
                    table.insert_reserve(doc.id.as_str(), byte_len)?;
                let dest = guard.as_mut();
                dest[0..4].copy_from_slice(&(path.len() as u32).to_le_bytes());
                dest[4..8].copy_from_slice(&(text.len() as u32).to_le_bytes());
                dest[8..12]
                    .copy_from_slice(&(doc.vector.len() as u32).to_le_bytes());

                let mut offset = HEADER_SIZE;
                dest[offset..offset + path.len()].copy_from_slice(path);
                offset += path.len();
                dest[offset..offset + text.len()].copy_from_slice(text);
                offset += text.len();
                dest[offset..].copy_from_slice(vector);
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CHUNKS)?;
            for id in ids {
                table.remove(id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn query_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Candidate>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(vector)?;

        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            entries.push((k.value().to_string(), v.value().to_vec()));
        }

        let query_norm = norm(vector);
        let mut candidates: Vec<Candidate> = entries
            .par_iter()
            .filter_map(|(id, bytes)| {
                let entry = decode_entry(bytes)?;
                if entry.vector.len() != vector.len() {
                    return None;
                }
                Some(Candidate {
                    score: cosine(vector, query_norm, &entry.vector),
                    id: id.clone(),
                    file_path: entry.file_path,
                    text: entry.text,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.len()? as usize)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("dir", &self.dir)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

struct StoredEntry {
    file_path: String,
    text: String,
    vector: Vec<f32>,
}

fn read_u32(bytes: &[u8], at: usize) -> Option<usize> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw) as usize)
}

fn decode_entry(bytes: &[u8]) -> Option<StoredEntry> {
    let path_len = read_u32(bytes, 0)?;
    let text_len = read_u32(bytes, 4)?;
    let dimension = read_u32(bytes, 8)?;

    let path_end = HEADER_SIZE + path_len;
    let text_end = path_end + text_len;
    if bytes.len() != text_end + dimension * 4 {
        return None;
    }

    let file_path = std::str::from_utf8(&bytes[HEADER_SIZE..path_end]).ok()?;
    let text = std::str::from_utf8(&bytes[path_end..text_end]).ok()?;
    // Values are not guaranteed to be 4-byte aligned inside the page.
    let vector = bytes[text_end..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Some(StoredEntry {
        file_path: file_path.to_string(),
        text: text.to_string(),
        vector,
    })
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, doc: &[f32]) -> f32 {
    let denom = query_norm * norm(doc);
    if denom == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(doc).map(|(a, b)| a * b).sum();
    dot / denom
}
