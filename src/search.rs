use std::{collections::HashSet, path::Path};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    embedding::Embedder,
    reranker::Reranker,
    vector_store::{Candidate, VectorStore},
};

/// Candidates fetched per requested result.
const OVERFETCH: usize = 10;

/// Upper bound on the candidate pool.
const MAX_CANDIDATES: usize = 50;

/// Entries kept after the lexical boost, and the most a reranker sees.
pub const RERANK_POOL: usize = 30;

/// Added when the whole query appears verbatim in the chunk.
const VERBATIM_BOOST: f32 = 0.2;

/// Added per distinct query token found in the chunk.
const TOKEN_BOOST: f32 = 0.03;

/// Query tokens this short or shorter earn no boost.
const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
    /// Candidates with raw similarity below this are dropped.
    pub score_threshold: f32,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            score_threshold: 0.0,
        }
    }
}

/// A ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    /// Final score: boosted similarity, or the reranker's score.
    pub score: f32,
    /// Raw vector similarity.
    pub similarity: f32,
    pub chunk_id: String,
    pub file_path: String,
    pub text: String,
}

impl SearchHit {
    /// Render as `[<filename>] <text>`.
    pub fn formatted(&self) -> String {
        format!("[{}] {}", file_name(&self.file_path), self.text)
    }
}

fn file_name(file_path: &str) -> String {
    Path::new(file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.to_string())
}

/// Execute the retrieval pipeline.
///
/// 1. Embed the query and fetch `min(limit * 10, 50)` nearest chunks
/// 2. Drop candidates below the threshold and apply the lexical boost
/// 3. Keep the best 30 and rerank them when a reranker is given
/// 4. Limit to `limit` results
///
/// Never fails: an empty query, an embedding failure, or a store failure
/// all yield no results. A failing reranker leaves the boosted order as is.
pub fn execute_search(
    params: &SearchParams,
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    reranker: Option<&dyn Reranker>,
) -> Vec<SearchHit> {
    let query = params.query.trim();
    if query.is_empty() || params.limit == 0 {
        return Vec::new();
    }

    // Stage 1: dense retrieval
    let query_vector = match embedder.embed(&[query.to_string()]) {
        Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
        Ok(vectors) => {
            warn!("query embedding returned {} vectors", vectors.len());
            return Vec::new();
        }
        Err(e) => {
            warn!("query embedding failed: {e}");
            return Vec::new();
        }
    };

    let pool = params.limit.saturating_mul(OVERFETCH).min(MAX_CANDIDATES);
    let candidates = match store.query_by_vector(&query_vector, pool) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("vector query failed: {e}");
            return Vec::new();
        }
    };
    if candidates.is_empty() {
        return Vec::new();
    }

    // Stage 2: lexical boost
    let mut ranked = lexical_boost(query, candidates, params.score_threshold);
    ranked.truncate(RERANK_POOL);

    // Stage 3: optional reranking
    if let Some(reranker) = reranker {
        apply_rerank(query, reranker, &mut ranked);
    }

    // Stage 4: limit
    ranked
        .into_iter()
        .take(params.limit)
        .enumerate()
        .map(|(i, mut hit)| {
            hit.rank = i + 1;
            hit
        })
        .collect()
}

/// Score candidates by similarity plus lexical matches and sort them by
/// that score, keeping candidate order among ties.
fn lexical_boost(
    query: &str,
    candidates: Vec<Candidate>,
    score_threshold: f32,
) -> Vec<SearchHit> {
    let query_lower = query.to_lowercase();
    let mut seen = HashSet::new();
    let tokens: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|t| t.chars().count() > MIN_TOKEN_CHARS)
        .filter(|t| seen.insert(*t))
        .collect();

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|c| c.score >= score_threshold)
        .map(|c| {
            let text_lower = c.text.to_lowercase();
            let mut score = c.score;
            if text_lower.contains(query_lower.as_str()) {
                score += VERBATIM_BOOST;
            }
            let matches =
                tokens.iter().filter(|t| text_lower.contains(**t)).count();
            score += matches as f32 * TOKEN_BOOST;

            SearchHit {
                rank: 0,
                score,
                similarity: c.score,
                chunk_id: c.id,
                file_path: c.file_path,
                text: c.text,
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits
}

fn apply_rerank(query: &str, reranker: &dyn Reranker, hits: &mut [SearchHit]) {
    if hits.is_empty() {
        return;
    }
    let texts: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
    match reranker.rerank(query, &texts) {
        Ok(scores) if scores.len() == hits.len() => {
            for (hit, score) in hits.iter_mut().zip(scores) {
                hit.score = score;
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            debug!("reranked {} candidates", hits.len());
        }
        Ok(scores) => warn!(
            "reranker returned {} scores for {} candidates; keeping boosted order",
            scores.len(),
            hits.len()
        ),
        Err(e) => warn!("reranking failed, keeping boosted order: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        error::{Error, Result},
        vector_store::ChunkDoc,
    };

    struct FixedEmbedder {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedEmbedder {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for FixedEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Embedding("offline".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        fn dimension(&self) -> Result<usize> {
            Ok(1)
        }

        fn provider(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    /// Returns canned candidates in the given order.
    struct CannedStore {
        candidates: Vec<Candidate>,
        fail: bool,
        requested: Mutex<Option<usize>>,
    }

    impl CannedStore {
        fn new(entries: &[(&str, &str, f32)]) -> Self {
            Self {
                candidates: entries
                    .iter()
                    .map(|(path, text, score)| Candidate {
                        score: *score,
                        id: format!("{path}#{text}"),
                        file_path: path.to_string(),
                        text: text.to_string(),
                    })
                    .collect(),
                fail: false,
                requested: Mutex::new(None),
            }
        }
    }

    impl VectorStore for CannedStore {
        fn upsert(&self, _docs: &[ChunkDoc]) -> Result<()> {
            Ok(())
        }

        fn delete(&self, _ids: &[String]) -> Result<()> {
            Ok(())
        }

        fn query_by_vector(
            &self,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<Candidate>> {
            *self.requested.lock().unwrap() = Some(top_k);
            if self.fail {
                return Err(Error::Config("store down".to_string()));
            }
            Ok(self.candidates.iter().take(top_k).cloned().collect())
        }

        fn count(&self) -> Result<usize> {
            Ok(self.candidates.len())
        }
    }

    struct ReverseReranker;

    impl Reranker for ReverseReranker {
        fn rerank(&self, _query: &str, docs: &[String]) -> Result<Vec<f32>> {
            Ok((0..docs.len()).map(|i| i as f32).collect())
        }
    }

    struct BrokenReranker;

    impl Reranker for BrokenReranker {
        fn rerank(&self, _query: &str, _docs: &[String]) -> Result<Vec<f32>> {
            Err(Error::Model("no model".to_string()))
        }
    }

    fn texts(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.text.as_str()).collect()
    }

    #[test]
    fn verbatim_match_beats_slightly_closer_vector() {
        let store = CannedStore::new(&[
            ("/t/near.md", "deployment checklist overview", 0.80),
            ("/t/exact.md", "set MAX_RETRIES=5 in the config", 0.75),
        ]);
        let hits = execute_search(
            &SearchParams::new("MAX_RETRIES=5", 5),
            &FixedEmbedder::ok(),
            &store,
            None,
        );

        assert_eq!(hits[0].file_path, "/t/exact.md");
        assert_eq!(hits[0].rank, 1);
        assert!((hits[0].similarity - 0.75).abs() < 1e-6);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn token_boost_counts_distinct_tokens_once() {
        let store = CannedStore::new(&[("/t/a.md", "cache cache layer", 0.5)]);
        let hits = execute_search(
            &SearchParams::new("cache cache of", 5),
            &FixedEmbedder::ok(),
            &store,
            None,
        );
        // "cache cache of" is not verbatim in the text; "of" is too short.
        assert!((hits[0].score - (0.5 + TOKEN_BOOST)).abs() < 1e-6);
    }

    #[test]
    fn candidate_pool_is_bounded() {
        let store = CannedStore::new(&[("/t/a.md", "a", 0.1)]);
        let embedder = FixedEmbedder::ok();

        execute_search(&SearchParams::new("q", 2), &embedder, &store, None);
        assert_eq!(*store.requested.lock().unwrap(), Some(20));

        execute_search(&SearchParams::new("q", 9), &embedder, &store, None);
        assert_eq!(*store.requested.lock().unwrap(), Some(MAX_CANDIDATES));
    }

    #[test]
    fn threshold_drops_weak_candidates() {
        let store = CannedStore::new(&[
            ("/t/a.md", "strong", 0.9),
            ("/t/b.md", "weak", 0.1),
        ]);
        let params = SearchParams {
            query: "anything".to_string(),
            limit: 5,
            score_threshold: 0.5,
        };
        let hits = execute_search(&params, &FixedEmbedder::ok(), &store, None);
        assert_eq!(texts(&hits), vec!["strong"]);
    }

    #[test]
    fn ties_keep_candidate_order() {
        let store = CannedStore::new(&[
            ("/t/a.md", "first", 0.5),
            ("/t/b.md", "second", 0.5),
            ("/t/c.md", "third", 0.5),
        ]);
        let hits = execute_search(
            &SearchParams::new("zzz", 5),
            &FixedEmbedder::ok(),
            &store,
            None,
        );
        assert_eq!(texts(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn limit_truncates_results() {
        let store = CannedStore::new(&[
            ("/t/a.md", "a", 0.9),
            ("/t/b.md", "b", 0.8),
            ("/t/c.md", "c", 0.7),
        ]);
        let hits = execute_search(
            &SearchParams::new("zzz", 2),
            &FixedEmbedder::ok(),
            &store,
            None,
        );
        assert_eq!(texts(&hits), vec!["a", "b"]);
        assert_eq!(hits[1].rank, 2);
    }

    #[test]
    fn empty_query_returns_nothing_without_embedding() {
        let store = CannedStore::new(&[("/t/a.md", "a", 0.9)]);
        let embedder = FixedEmbedder::ok();
        assert!(
            execute_search(&SearchParams::new("   ", 5), &embedder, &store, None)
                .is_empty()
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failures_yield_empty_results() {
        let store = CannedStore::new(&[("/t/a.md", "a", 0.9)]);
        assert!(
            execute_search(
                &SearchParams::new("q", 5),
                &FixedEmbedder::failing(),
                &store,
                None
            )
            .is_empty()
        );

        let mut broken = CannedStore::new(&[("/t/a.md", "a", 0.9)]);
        broken.fail = true;
        assert!(
            execute_search(
                &SearchParams::new("q", 5),
                &FixedEmbedder::ok(),
                &broken,
                None
            )
            .is_empty()
        );
    }

    #[test]
    fn empty_store_returns_nothing() {
        let store = CannedStore::new(&[]);
        assert!(
            execute_search(
                &SearchParams::new("q", 5),
                &FixedEmbedder::ok(),
                &store,
                None
            )
            .is_empty()
        );
    }

    #[test]
    fn reranker_reorders_and_failure_falls_back() {
        let store = CannedStore::new(&[
            ("/t/a.md", "a", 0.9),
            ("/t/b.md", "b", 0.8),
        ]);
        let embedder = FixedEmbedder::ok();
        let params = SearchParams::new("zzz", 5);

        let reranked =
            execute_search(&params, &embedder, &store, Some(&ReverseReranker));
        assert_eq!(texts(&reranked), vec!["b", "a"]);

        let fallback =
            execute_search(&params, &embedder, &store, Some(&BrokenReranker));
        assert_eq!(texts(&fallback), vec!["a", "b"]);
    }

    #[test]
    fn formatted_uses_file_name() {
        let hit = SearchHit {
            rank: 1,
            score: 1.0,
            similarity: 1.0,
            chunk_id: "x".to_string(),
            file_path: "/tree/docs/guide.md".to_string(),
            text: "hello".to_string(),
        };
        assert_eq!(hit.formatted(), "[guide.md] hello");
    }
}
