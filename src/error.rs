use std::fmt;
use std::io;
use std::path::PathBuf;

use semantic::SemanticError;
use thiserror::Error;

use crate::config::ConfigLoadError;

/// Where in the policy document an error was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Root,
    Semantic,
    Cases,
    Case { case: usize },
    Examples { case: usize },
    Example { case: usize, example: usize },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Root => write!(f, "document root"),
            Location::Semantic => write!(f, "semantic"),
            Location::Cases => write!(f, "semantic.cases"),
            Location::Case { case } => write!(f, "semantic.cases[{case}]"),
            Location::Examples { case } => write!(f, "semantic.cases[{case}].examples"),
            Location::Example { case, example } => {
                write!(f, "semantic.cases[{case}].examples[{example}]")
            }
        }
    }
}

/// Everything that can abort an enrichment run. None of these are recovered locally.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse policy document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unexpected shape at {location}: {message}")]
    Schema { location: Location, message: String },

    #[error("failed to set up embedding provider: {0}")]
    Provider(#[from] SemanticError),

    #[error("embedding failed for {location}: {source}")]
    Embedding {
        location: Location,
        #[source]
        source: SemanticError,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigLoadError),
}

const EX_NOINPUT: u8 = 66;

impl EnrichError {
    pub(crate) fn schema(location: Location, message: impl Into<String>) -> Self {
        EnrichError::Schema {
            location,
            message: message.into(),
        }
    }

    /// Process exit status for this failure.
    ///
    /// A missing input gets `EX_NOINPUT` (66) from `sysexits.h`, which keeps it apart from the
    /// status 2 that command-line usage errors exit with.
    pub fn exit_code(&self) -> u8 {
        match self {
            EnrichError::NotFound(_) => EX_NOINPUT,
            _ => 1,
        }
    }
}
