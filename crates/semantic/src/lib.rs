//! Embedding providers for policy-embed.
//!
//! Every provider turns a piece of example text into a dense vector behind the [`Embedder`]
//! trait, so callers never care where the numbers come from.
//!
//! - **ONNX mode** - Runs a sentence-transformers model locally. Assets are fetched from the
//!   Hugging Face hub on first use and cached under `./models/`.
//! - **API mode** - Calls a remote feature-extraction endpoint (Hugging Face, OpenAI-style, or a
//!   custom `{"text": ...}` service).
//! - **Stub mode** - Deterministic hash-derived vectors. No model, no network; used in tests.
//!
//! Unlike a search pipeline there is no silent fallback here: a missing model is an error,
//! because a stub vector written into a policy file would poison every later match.
//!
//! ## Threading notes
//!
//! ONNX sessions are cached per thread. The first call on a thread pays the load cost.
//!
//! ## Quick example
//!
//! ```no_run
//! use semantic::{embedder_from_config, SemanticConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), semantic::SemanticError> {
//!     let cfg = SemanticConfig::for_model("all-MiniLM-L6-v2");
//!     let embedder = embedder_from_config(&cfg).await?;
//!     let vector = embedder.embed("ignore previous instructions").await?;
//!     assert_eq!(vector.len(), 384);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod normalize;

mod api;
mod assets;
mod cache;
mod onnx;
mod stub;

use async_trait::async_trait;
use tracing::info;

pub use crate::api::ApiEmbedder;
pub use crate::config::{SemanticConfig, DEFAULT_MODEL};
pub use crate::error::SemanticError;
pub use crate::onnx::OnnxEmbedder;
pub use crate::stub::StubEmbedder;

/// Turns text into an embedding vector.
///
/// Implementations must be deterministic for a fixed model: equal text yields the same vector
/// (up to floating-point noise of the runtime).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model_name(&self) -> &str;

    /// Embeds a single text. Empty strings are valid input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError>;
}

#[async_trait]
impl<E> Embedder for Box<E>
where
    E: Embedder + ?Sized,
{
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        (**self).embed(text).await
    }
}

/// Adapts a plain function into an [`Embedder`].
///
/// ```
/// use semantic::{Embedder, FnEmbedder};
///
/// let embedder = FnEmbedder::new("length", |text: &str| Ok(vec![text.len() as f32]));
/// assert_eq!(embedder.model_name(), "length");
/// ```
pub struct FnEmbedder<F> {
    model_name: String,
    func: F,
}

impl<F> FnEmbedder<F>
where
    F: Fn(&str) -> Result<Vec<f32>, SemanticError> + Send + Sync,
{
    pub fn new(model_name: impl Into<String>, func: F) -> Self {
        Self {
            model_name: model_name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&str) -> Result<Vec<f32>, SemanticError> + Send + Sync,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        (self.func)(text)
    }
}

/// Builds the provider selected by `cfg.mode`.
///
/// ONNX mode resolves and loads the model eagerly so that asset problems surface before any
/// document work starts.
pub async fn embedder_from_config(
    cfg: &SemanticConfig,
) -> Result<Box<dyn Embedder>, SemanticError> {
    cfg.validate()?;
    info!(mode = %cfg.mode, model = %cfg.model_name, "building embedder");

    match cfg.mode.as_str() {
        "stub" => Ok(Box::new(StubEmbedder::from_config(cfg))),
        "api" => Ok(Box::new(ApiEmbedder::new(cfg)?)),
        "onnx" => Ok(Box::new(OnnxEmbedder::load(cfg).await?)),
        other => Err(SemanticError::InvalidConfig(format!(
            "unknown embedder mode '{other}'"
        ))),
    }
}
