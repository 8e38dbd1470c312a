use std::io;
use thiserror::Error;

/// Errors surfaced by embedding providers.
#[derive(Debug, Error)]
pub enum SemanticError {
    /// The ONNX model could not be located locally and no fallback URL was provided.
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    /// The tokenizer JSON is missing and there was no remote URL to fetch it from.
    #[error("tokenizer missing: {0}")]
    TokenizerMissing(String),
    /// Configuration is inconsistent (e.g., `api` mode without an endpoint).
    #[error("invalid semantic config: {0}")]
    InvalidConfig(String),
    /// Unable to download remote assets or reach the embedding API.
    #[error("download failed: {0}")]
    Download(String),
    /// Low-level IO failures while touching the filesystem.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// ONNX Runtime, tokenizer, or response decoding errors.
    #[error("inference failure: {0}")]
    Inference(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_model_not_found() {
        let err = SemanticError::ModelNotFound("/path/to/model.onnx".into());
        assert!(err.to_string().contains("model file not found"));
        assert!(err.to_string().contains("/path/to/model.onnx"));
    }

    #[test]
    fn error_tokenizer_missing() {
        let err = SemanticError::TokenizerMissing("all-MiniLM-L6-v2".into());
        assert!(err.to_string().contains("tokenizer missing"));
        assert!(err.to_string().contains("all-MiniLM-L6-v2"));
    }

    #[test]
    fn error_invalid_config() {
        let err = SemanticError::InvalidConfig("api_url is required".into());
        assert!(err.to_string().contains("invalid semantic config"));
    }

    #[test]
    fn error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: SemanticError = io_err.into();
        assert!(err.to_string().contains("io error"));
        assert!(matches!(err, SemanticError::Io(_)));
    }

    #[test]
    fn error_debug_formatting() {
        let err = SemanticError::Inference("model returned no outputs".into());
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Inference"));
        assert!(debug_str.contains("model returned no outputs"));
    }
}
