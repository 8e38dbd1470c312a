//! YAML configuration file support for policy-embed.
//!
//! Every flag of the command line has a sensible default, so the file is optional. It exists
//! for the settings that are awkward on a command line: remote endpoints, auth headers, and
//! local asset locations.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! jobs: 4
//!
//! semantic:
//!   mode: "api"
//!   model_name: "all-MiniLM-L6-v2"
//!   api_url: "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2"
//!   api_provider: "hf"
//!   api_auth_header: "Bearer hf_xxx"
//!   api_timeout_secs: 30
//! ```
//!
//! Values are layered: built-in defaults, then this file, then command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use semantic::{SemanticConfig, DEFAULT_MODEL};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration for the tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Configuration format version
    pub version: String,

    /// Embedding calls allowed in flight at once
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Embedding provider overrides
    #[serde(default)]
    pub semantic: SemanticYamlConfig,
}

impl ToolConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: ToolConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if self.jobs == 0 {
            return Err(ConfigLoadError::Validation("jobs must be >= 1".to_string()));
        }

        self.semantic.validate()
    }

    /// Layers command-line overrides on top of this file and produces the final settings.
    pub fn resolve(&self, overrides: &Overrides) -> Result<ResolvedConfig, ConfigLoadError> {
        let jobs = overrides.jobs.unwrap_or(self.jobs);
        if jobs == 0 {
            return Err(ConfigLoadError::Validation("jobs must be >= 1".to_string()));
        }

        let mut semantic = self.semantic.to_semantic_config(overrides.model.as_deref());
        if let Some(mode) = overrides.provider.as_deref() {
            semantic.mode = mode.to_string();
        }
        semantic.normalize = true;
        semantic
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;

        Ok(ResolvedConfig { jobs, semantic })
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            jobs: default_jobs(),
            semantic: SemanticYamlConfig::default(),
        }
    }
}

/// Settings given on the command line. `None` leaves the file (or default) value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub jobs: Option<usize>,
}

/// Final settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub jobs: usize,
    pub semantic: SemanticConfig,
}

/// Semantic provider YAML configuration. Unset fields keep the defaults derived from the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticYamlConfig {
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub model_name: Option<String>,

    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default)]
    pub model_url: Option<String>,

    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,

    #[serde(default)]
    pub tokenizer_url: Option<String>,

    #[serde(default)]
    pub max_sequence_length: Option<usize>,

    #[serde(default)]
    pub pooling: Option<String>,

    /// Only `true` is accepted. Stored embeddings are always unit length.
    #[serde(default)]
    pub normalize: Option<bool>,

    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub api_auth_header: Option<String>,

    #[serde(default)]
    pub api_provider: Option<String>,

    #[serde(default)]
    pub api_timeout_secs: Option<u64>,

    #[serde(default)]
    pub stub_dim: Option<usize>,
}

impl SemanticYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if let Some(mode) = self.mode.as_deref() {
            if !semantic::config::MODES.contains(&mode) {
                return Err(ConfigLoadError::Validation(format!(
                    "semantic.mode must be one of {:?}, got '{mode}'",
                    semantic::config::MODES
                )));
            }
        }
        if let Some(pooling) = self.pooling.as_deref() {
            if !semantic::config::POOLING_STRATEGIES.contains(&pooling) {
                return Err(ConfigLoadError::Validation(format!(
                    "semantic.pooling must be one of {:?}, got '{pooling}'",
                    semantic::config::POOLING_STRATEGIES
                )));
            }
        }
        if self.max_sequence_length == Some(0) {
            return Err(ConfigLoadError::Validation(
                "semantic.max_sequence_length must be >= 1".to_string(),
            ));
        }
        if self.normalize == Some(false) {
            return Err(ConfigLoadError::Validation(
                "semantic.normalize cannot be disabled; embeddings are always L2-normalized"
                    .to_string(),
            ));
        }
        if self.stub_dim == Some(0) {
            return Err(ConfigLoadError::Validation(
                "semantic.stub_dim must be >= 1".to_string(),
            ));
        }
        if self.mode.as_deref() == Some("api") && self.api_url.is_none() {
            return Err(ConfigLoadError::Validation(
                "semantic.api_url is required when semantic.mode is 'api'".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a provider config for `model` (or the file's model, or the default), then applies
    /// every field set in this section.
    fn to_semantic_config(&self, model: Option<&str>) -> SemanticConfig {
        let model = model
            .or(self.model_name.as_deref())
            .unwrap_or(DEFAULT_MODEL);
        let mut cfg = SemanticConfig::for_model(model);

        if let Some(mode) = &self.mode {
            cfg.mode = mode.clone();
        }
        if let Some(path) = &self.model_path {
            cfg.model_path = path.clone();
        }
        if self.model_url.is_some() {
            cfg.model_url = self.model_url.clone();
        }
        if self.tokenizer_path.is_some() {
            cfg.tokenizer_path = self.tokenizer_path.clone();
        }
        if self.tokenizer_url.is_some() {
            cfg.tokenizer_url = self.tokenizer_url.clone();
        }
        if let Some(max) = self.max_sequence_length {
            cfg.max_sequence_length = max;
        }
        if let Some(pooling) = &self.pooling {
            cfg.pooling = pooling.clone();
        }
        if self.api_url.is_some() {
            cfg.api_url = self.api_url.clone();
        }
        if self.api_auth_header.is_some() {
            cfg.api_auth_header = self.api_auth_header.clone();
        }
        if self.api_provider.is_some() {
            cfg.api_provider = self.api_provider.clone();
        }
        if self.api_timeout_secs.is_some() {
            cfg.api_timeout_secs = self.api_timeout_secs;
        }
        if let Some(dim) = self.stub_dim {
            cfg.stub_dim = dim;
        }
        cfg
    }
}

fn default_jobs() -> usize {
    1
}
