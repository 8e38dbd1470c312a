use async_trait::async_trait;
use fxhash::hash64;

use crate::normalize::l2_normalize_in_place;
use crate::{Embedder, SemanticConfig, SemanticError};

/// Deterministic provider for tests and offline runs.
///
/// Generates sinusoid values derived from a hash of the input text, so equal text always maps to
/// the same vector and no model assets are touched.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    model_name: String,
    dim: usize,
    normalize: bool,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            model_name: "stub".into(),
            dim,
            normalize: true,
        }
    }

    pub fn from_config(cfg: &SemanticConfig) -> Self {
        Self {
            model_name: cfg.model_name.clone(),
            dim: cfg.stub_dim,
            normalize: cfg.normalize,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The vector [`Embedder::embed`] returns for `text`, computed synchronously.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let h = hash64(text.as_bytes());
        for (idx, value) in v.iter_mut().enumerate() {
            *value = ((h >> (idx % 32)) as f32 * 0.0001).sin();
        }
        if self.normalize {
            l2_normalize_in_place(&mut v);
        }
        v
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        Ok(self.vector_for(text))
    }
}
