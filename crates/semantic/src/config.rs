use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::SemanticError;

/// Model used when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Hugging Face organisation that bare model identifiers resolve under.
const DEFAULT_MODEL_ORG: &str = "sentence-transformers";

const HF_BASE_URL: &str = "https://huggingface.co";

/// Provider modes understood by [`crate::embedder_from_config`].
pub const MODES: [&str; 3] = ["onnx", "api", "stub"];

/// Token pooling strategies understood by the ONNX provider.
pub const POOLING_STRATEGIES: [&str; 2] = ["mean", "cls"];

/// Runtime configuration describing which provider/model to use and how to post-process vectors.
///
/// # Example
/// ```no_run
/// use semantic::{embedder_from_config, SemanticConfig};
///
/// # async fn run() -> Result<(), semantic::SemanticError> {
/// let cfg = SemanticConfig {
///     mode: "api".into(),
///     api_url: Some("https://api.openai.com/v1/embeddings".into()),
///     api_auth_header: Some("Bearer sk-xxx".into()),
///     api_provider: Some("openai".into()),
///     model_name: "text-embedding-3-small".into(),
///     ..Default::default()
/// };
///
/// let embedder = embedder_from_config(&cfg).await?;
/// let vector = embedder.embed("ignore previous instructions").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticConfig {
    /// Provider selector: `"onnx"` (local), `"api"` (remote HTTP), or `"stub"` (deterministic).
    pub mode: String,
    /// Model identifier. Also sent as `model` to OpenAI-style APIs.
    pub model_name: String,
    /// Local path where the ONNX file should live (also used as the download target when
    /// [`model_url`](Self::model_url) is provided).
    pub model_path: PathBuf,
    /// Optional HTTPS URL that will be downloaded when [`model_path`](Self::model_path) is missing.
    pub model_url: Option<String>,
    /// Path to `tokenizer.json`. When absent and [`tokenizer_url`](Self::tokenizer_url) is provided we
    /// infer the filename from the URL and place it next to the model file.
    pub tokenizer_path: Option<PathBuf>,
    /// Optional HTTPS URL for fetching the tokenizer on-demand.
    pub tokenizer_url: Option<String>,
    /// Inputs longer than this many tokens are truncated.
    pub max_sequence_length: usize,
    /// How token embeddings collapse into one vector: `"mean"` (mask-aware) or `"cls"`.
    pub pooling: String,
    /// Normalize the resulting vector to unit-length.
    pub normalize: bool,
    /// API inference endpoint when [`mode`](Self::mode) is `"api"`.
    pub api_url: Option<String>,
    /// Authorization header (e.g., `"Bearer hf_xxx"`).
    pub api_auth_header: Option<String>,
    /// Remote provider hint: `"hf"`, `"openai"`, or `"custom"` (default).
    pub api_provider: Option<String>,
    /// Overall API timeout in seconds.
    pub api_timeout_secs: Option<u64>,
    /// Vector length produced by the stub provider.
    pub stub_dim: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self::for_model(DEFAULT_MODEL)
    }
}

impl SemanticConfig {
    /// Builds the default ONNX configuration for a model identifier.
    ///
    /// Bare names (`all-MiniLM-L6-v2`) resolve under `sentence-transformers/`; `org/name`
    /// identifiers are used as-is. Assets live under `./models/<name>/` and are fetched from
    /// the Hugging Face hub on first use.
    pub fn for_model(model: &str) -> Self {
        let repo = if model.contains('/') {
            model.to_string()
        } else {
            format!("{DEFAULT_MODEL_ORG}/{model}")
        };
        let local_name = repo.rsplit('/').next().unwrap_or(model);
        let local_dir = PathBuf::from("./models").join(local_name);

        Self {
            mode: "onnx".into(),
            model_name: model.to_string(),
            model_path: local_dir.join("onnx").join("model.onnx"),
            model_url: Some(format!("{HF_BASE_URL}/{repo}/resolve/main/onnx/model.onnx")),
            tokenizer_path: Some(local_dir.join("tokenizer.json")),
            tokenizer_url: Some(format!("{HF_BASE_URL}/{repo}/resolve/main/tokenizer.json")),
            max_sequence_length: 256,
            pooling: "mean".into(),
            normalize: true,
            api_url: None,
            api_auth_header: None,
            api_provider: None,
            api_timeout_secs: Some(30),
            stub_dim: 384,
        }
    }

    /// Rejects combinations no provider can run with.
    pub fn validate(&self) -> Result<(), SemanticError> {
        if !MODES.contains(&self.mode.as_str()) {
            return Err(SemanticError::InvalidConfig(format!(
                "mode must be one of {MODES:?}, got '{}'",
                self.mode
            )));
        }
        if !POOLING_STRATEGIES.contains(&self.pooling.as_str()) {
            return Err(SemanticError::InvalidConfig(format!(
                "pooling must be one of {POOLING_STRATEGIES:?}, got '{}'",
                self.pooling
            )));
        }
        if self.max_sequence_length == 0 {
            return Err(SemanticError::InvalidConfig(
                "max_sequence_length must be >= 1".into(),
            ));
        }
        if self.mode == "api" && self.api_url.is_none() {
            return Err(SemanticError::InvalidConfig(
                "api_url is required for api mode".into(),
            ));
        }
        if self.mode == "stub" && self.stub_dim == 0 {
            return Err(SemanticError::InvalidConfig("stub_dim must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let cfg = SemanticConfig::default();
        assert_eq!(cfg.mode, "onnx");
        assert_eq!(cfg.model_name, "all-MiniLM-L6-v2");
        assert_eq!(
            cfg.model_path,
            PathBuf::from("./models/all-MiniLM-L6-v2/onnx/model.onnx")
        );
        assert_eq!(
            cfg.tokenizer_path,
            Some(PathBuf::from("./models/all-MiniLM-L6-v2/tokenizer.json"))
        );
        assert_eq!(cfg.max_sequence_length, 256);
        assert_eq!(cfg.pooling, "mean");
        assert!(cfg.normalize);
        assert!(cfg.api_url.is_none());
        assert_eq!(cfg.api_timeout_secs, Some(30));
        assert_eq!(cfg.stub_dim, 384);
    }

    #[test]
    fn bare_model_names_resolve_under_sentence_transformers() {
        let cfg = SemanticConfig::for_model("paraphrase-MiniLM-L3-v2");
        assert_eq!(
            cfg.model_url.as_deref(),
            Some("https://huggingface.co/sentence-transformers/paraphrase-MiniLM-L3-v2/resolve/main/onnx/model.onnx")
        );
        assert_eq!(
            cfg.tokenizer_url.as_deref(),
            Some("https://huggingface.co/sentence-transformers/paraphrase-MiniLM-L3-v2/resolve/main/tokenizer.json")
        );
    }

    #[test]
    fn qualified_model_names_keep_their_org() {
        let cfg = SemanticConfig::for_model("BAAI/bge-small-en-v1.5");
        assert_eq!(cfg.model_name, "BAAI/bge-small-en-v1.5");
        assert_eq!(
            cfg.model_path,
            PathBuf::from("./models/bge-small-en-v1.5/onnx/model.onnx")
        );
        assert!(cfg
            .model_url
            .as_deref()
            .unwrap()
            .starts_with("https://huggingface.co/BAAI/bge-small-en-v1.5/"));
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(SemanticConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_mode() {
        let cfg = SemanticConfig {
            mode: "gpu".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("mode must be one of"));
    }

    #[test]
    fn validate_rejects_unknown_pooling() {
        let cfg = SemanticConfig {
            pooling: "max".into(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_api_url_in_api_mode() {
        let cfg = SemanticConfig {
            mode: "api".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("api_url is required"));

        let cfg = SemanticConfig {
            mode: "api".into(),
            api_url: Some("https://api.example.com/embed".into()),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sequence_length() {
        let cfg = SemanticConfig {
            max_sequence_length: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = SemanticConfig {
            mode: "api".into(),
            api_url: Some("https://api.example.com/embed".into()),
            api_auth_header: Some("Bearer token123".into()),
            api_provider: Some("openai".into()),
            api_timeout_secs: Some(60),
            pooling: "cls".into(),
            normalize: false,
            ..SemanticConfig::for_model("test-model")
        };

        let serialized = serde_json::to_string(&cfg).unwrap();
        let deserialized: SemanticConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(cfg, deserialized);
    }
}
