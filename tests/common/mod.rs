//! Shared helpers for integration tests.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use srcbert::{
    embedding::{Embedder, normalize},
    error::{Error, Result},
};

/// Feature-hashing bag of words: texts sharing words get similar vectors.
#[allow(dead_code)]
pub struct HashEmbedder {
    dimension: usize,
    /// Number of `embed` calls made so far.
    pub calls: AtomicUsize,
    /// When set, every `embed` call fails.
    pub fail: AtomicBool,
    /// Vectors from this position of a call on get one extra dimension.
    pub skew_from: AtomicUsize,
    /// Sleep per `embed` call, in milliseconds.
    pub delay_ms: AtomicU64,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            skew_from: AtomicUsize::new(usize::MAX),
            delay_ms: AtomicU64::new(0),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        normalize(&mut v);
        v
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Embedding("embedder offline".to_string()));
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let skew_from = self.skew_from.load(Ordering::SeqCst);
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut v = self.vectorize(t);
                if i >= skew_from {
                    v.push(0.0);
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> Result<usize> {
        Ok(self.dimension)
    }

    fn provider(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        "bag-of-words"
    }
}
