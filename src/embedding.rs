use std::sync::{Arc, Mutex, OnceLock};

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::ProviderConfig,
    error::{Error, Result},
    model_manager::ModelManager,
};

/// Texts per forward pass of the local model.
const LOCAL_BATCH_SIZE: usize = 32;

/// Texts per request to a remote embedding API.
const REMOTE_BATCH_SIZE: usize = 64;

/// Turns text into fixed-size vectors.
///
/// `embed` returns one vector per input, in input order. Any failure is
/// reported as an error for the whole call.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this embedder produces.
    fn dimension(&self) -> Result<usize>;

    /// Short provider name recorded in collection metadata.
    fn provider(&self) -> &str;

    fn model(&self) -> &str;
}

/// The configured embedding backend, chosen once at startup.
pub enum EmbedProvider {
    Local(LocalModel),
    Remote(RemoteApi),
}

impl EmbedProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Local { model_id } => Self::Local(LocalModel::new(
                Arc::new(Mutex::new(ModelManager::new(model_id.clone()))),
            )),
            ProviderConfig::Remote {
                base_url,
                model,
                api_key,
                dimension,
            } => Self::Remote(RemoteApi::new(
                base_url.clone(),
                model.clone(),
                api_key.clone(),
                *dimension,
            )),
        }
    }

    fn inner(&self) -> &dyn Embedder {
        match self {
            Self::Local(local) => local,
            Self::Remote(remote) => remote,
        }
    }
}

impl Embedder for EmbedProvider {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner().embed(texts)
    }

    fn dimension(&self) -> Result<usize> {
        self.inner().dimension()
    }

    fn provider(&self) -> &str {
        self.inner().provider()
    }

    fn model(&self) -> &str {
        self.inner().model()
    }
}

/// Local ColBERT model producing one vector per text by mean-pooling its
/// token embeddings.
pub struct LocalModel {
    manager: Arc<Mutex<ModelManager>>,
    model_id: String,
    dimension: OnceLock<usize>,
}

impl LocalModel {
    pub fn new(manager: Arc<Mutex<ModelManager>>) -> Self {
        let model_id = manager
            .lock()
            .map(|m| m.model_id().to_string())
            .unwrap_or_default();
        Self {
            manager,
            model_id,
            dimension: OnceLock::new(),
        }
    }

    /// Shared handle to the underlying model, for the reranker.
    pub fn manager(&self) -> Arc<Mutex<ModelManager>> {
        Arc::clone(&self.manager)
    }
}

impl Embedder for LocalModel {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut manager = self
            .manager
            .lock()
            .map_err(|_| Error::Model("model lock poisoned".to_string()))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(LOCAL_BATCH_SIZE) {
            let embeddings = manager.encode_documents(batch)?;
            let pooled = mean_pool(&embeddings)?;
            if pooled.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "model returned {} embeddings for {} texts",
                    pooled.len(),
                    batch.len()
                )));
            }
            vectors.extend(pooled);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> Result<usize> {
        if let Some(dim) = self.dimension.get() {
            return Ok(*dim);
        }
        let sample = self.embed(&["dimension check".to_string()])?;
        let dim = sample.first().map(Vec::len).ok_or_else(|| {
            Error::Model("sample encode returned nothing".to_string())
        })?;
        debug!("model {} produces {dim}-dim vectors", self.model_id);
        Ok(*self.dimension.get_or_init(|| dim))
    }

    fn provider(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model_id
    }
}

/// Average the non-padding token rows of a `[B, T, D]` tensor and
/// L2-normalize, giving `B` vectors of length `D`.
///
/// Padding rows are all zeros and are excluded from the mean.
pub fn mean_pool(embeddings: &Tensor) -> Result<Vec<Vec<f32>>> {
    let docs: Vec<Vec<Vec<f32>>> =
        embeddings.to_dtype(DType::F32)?.to_vec3()?;

    Ok(docs
        .into_iter()
        .map(|tokens| {
            let dim = tokens.first().map(Vec::len).unwrap_or(0);
            let mut sum = vec![0.0f32; dim];
            let mut count = 0usize;
            for row in tokens.iter().filter(|r| r.iter().any(|x| *x != 0.0)) {
                for (acc, x) in sum.iter_mut().zip(row) {
                    *acc += x;
                }
                count += 1;
            }
            if count > 0 {
                for acc in &mut sum {
                    *acc /= count as f32;
                }
            }
            normalize(&mut sum);
            sum
        })
        .collect())
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}

/// Default vector length for a known remote model name.
pub fn remote_dimension_for(model: &str) -> usize {
    if model.contains("3-large") { 3072 } else { 1536 }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteApi {
    client: OnceLock<reqwest::blocking::Client>,
    endpoint: String,
    model: String,
    api_key: String,
    dimension: usize,
    /// Sent as `dimensions` only when the user asked for a specific size.
    requested_dimension: Option<usize>,
    /// Set once the endpoint has answered with vectors of `dimension`.
    verified: OnceLock<usize>,
}

impl RemoteApi {
    pub fn new(
        base_url: String,
        model: String,
        api_key: String,
        dimension: Option<usize>,
    ) -> Self {
        Self {
            client: OnceLock::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            dimension: dimension
                .unwrap_or_else(|| remote_dimension_for(&model)),
            requested_dimension: dimension,
            verified: OnceLock::new(),
            model,
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Vector length implied by the model name or the requested size.
    pub fn expected_dimension(&self) -> usize {
        self.dimension
    }

    // The blocking client owns a runtime, so it is built on first use from
    // a worker thread rather than inside an async context.
    fn client(&self) -> &reqwest::blocking::Client {
        self.client.get_or_init(reqwest::blocking::Client::new)
    }

    fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input: batch,
            model: &self.model,
            dimensions: self.requested_dimension,
        };

        let mut response: EmbeddingResponse = self
            .client()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?
            .error_for_status()?
            .json()?;

        if response.data.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "API returned {} embeddings for {} texts",
                response.data.len(),
                batch.len()
            )));
        }
        response.data.sort_by_key(|item| item.index);
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}

impl Embedder for RemoteApi {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(REMOTE_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }

    /// Embeds one short text so that an unreachable endpoint, a rejected
    /// key, or a model of another width fails at startup.
    fn dimension(&self) -> Result<usize> {
        if let Some(dim) = self.verified.get() {
            return Ok(*dim);
        }
        let sample = self
            .embed_batch(&["dimension check".to_string()])
            .map_err(|e| {
                Error::Config(format!(
                    "embedding provider at {} is unreachable: {e}",
                    self.endpoint
                ))
            })?;
        let got = sample.first().map(Vec::len).unwrap_or(0);
        if got != self.dimension {
            return Err(Error::Config(format!(
                "{} returned {got}-dimensional vectors, expected {}",
                self.model, self.dimension
            )));
        }
        debug!("{} answered with {got}-dim vectors", self.endpoint);
        Ok(*self.verified.get_or_init(|| got))
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn mean_pool_skips_padding_rows() {
        // Two docs, three token slots, dim 2. The second doc has one
        // padding row.
        let data = vec![
            1.0, 0.0, 0.0, 1.0, 1.0, 1.0, //
            3.0, 4.0, 3.0, 4.0, 0.0, 0.0,
        ];
        let tensor = Tensor::from_vec(data, (2, 3, 2), &Device::Cpu).unwrap();

        let pooled = mean_pool(&tensor).unwrap();
        assert_eq!(pooled.len(), 2);

        let inv = 1.0 / 2f32.sqrt();
        assert!((pooled[0][0] - inv).abs() < 1e-6);
        assert!((pooled[0][1] - inv).abs() < 1e-6);
        assert!((pooled[1][0] - 0.6).abs() < 1e-6);
        assert!((pooled[1][1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn remote_dimensions_by_model_name() {
        assert_eq!(remote_dimension_for("text-embedding-3-large"), 3072);
        assert_eq!(remote_dimension_for("text-embedding-3-small"), 1536);
        assert_eq!(remote_dimension_for("text-embedding-ada-002"), 1536);
    }

    #[test]
    fn remote_api_builds_endpoint_and_dimension() {
        let api = RemoteApi::new(
            "https://example.test/v1/".to_string(),
            "text-embedding-3-large".to_string(),
            "key".to_string(),
            None,
        );
        assert_eq!(api.endpoint(), "https://example.test/v1/embeddings");
        assert_eq!(api.expected_dimension(), 3072);
        assert_eq!(api.provider(), "openai");

        let sized = RemoteApi::new(
            "https://example.test/v1".to_string(),
            "text-embedding-3-large".to_string(),
            "key".to_string(),
            Some(256),
        );
        assert_eq!(sized.expected_dimension(), 256);
    }

    #[test]
    fn unreachable_remote_fails_dimension_check() {
        // Nothing listens on the discard port.
        let api = RemoteApi::new(
            "http://127.0.0.1:9/v1".to_string(),
            "text-embedding-3-small".to_string(),
            "key".to_string(),
            None,
        );
        let err = api.dimension().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn request_omits_dimensions_unless_set() {
        let input = vec!["a".to_string()];
        let plain = EmbeddingRequest {
            input: &input,
            model: "m",
            dimensions: None,
        };
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["model"], "m");
    }

    #[test]
    fn response_parses_and_sorts() {
        let body = r#"{"data":[
            {"index":1,"embedding":[0.0,1.0]},
            {"index":0,"embedding":[1.0,0.0]}
        ]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        parsed.data.sort_by_key(|item| item.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn provider_selected_from_config() {
        let local = EmbedProvider::from_config(&ProviderConfig::Local {
            model_id: "some/model".to_string(),
        });
        assert_eq!(local.provider(), "local");
        assert_eq!(local.model(), "some/model");

        let remote = EmbedProvider::from_config(&ProviderConfig::Remote {
            base_url: "http://localhost".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: "k".to_string(),
            dimension: None,
        });
        assert_eq!(remote.provider(), "openai");
        assert_eq!(remote.dimension().unwrap(), 1536);
    }
}
