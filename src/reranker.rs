use std::sync::{Arc, Mutex};

use candle_core::Tensor;

use crate::{
    error::{Error, Result},
    model_manager::ModelManager,
};

/// Rescores a shortlist of candidate texts against a query.
pub trait Reranker: Send + Sync {
    /// One score per document, in input order. Higher is better.
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Late-interaction reranker: encodes the query and each candidate with
/// ColBERT and scores them by MaxSim.
pub struct ColbertReranker {
    manager: Arc<Mutex<ModelManager>>,
}

impl ColbertReranker {
    pub fn new(manager: Arc<Mutex<ModelManager>>) -> Self {
        Self { manager }
    }
}

impl Reranker for ColbertReranker {
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut manager = self
            .manager
            .lock()
            .map_err(|_| Error::Model("model lock poisoned".to_string()))?;
        let query_embedding = manager.encode_query(query)?;
        let doc_embeddings = manager.encode_documents(documents)?;
        drop(manager);

        // [B, T, D]; padding rows score zero against any query token, so
        // they never win a row max over a real token with positive
        // similarity.
        (0..documents.len())
            .map(|i| maxsim(&query_embedding, &doc_embeddings.get(i)?))
            .collect()
    }
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
fn maxsim(query_embedding: &Tensor, doc_embedding: &Tensor) -> Result<f32> {
    // Compute similarity matrix [Q, T] = query_emb @ doc_emb^T
    let sim_matrix = query_embedding.matmul(&doc_embedding.t()?)?;

    // Take max along dimension 1 (best document token per query token)
    let row_maxes = sim_matrix.max(1)?;

    Ok(row_maxes.sum_all()?.to_scalar::<f32>()?)
}
