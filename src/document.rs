//! Loading and writing policy documents.
//!
//! The document is kept as a raw [`serde_yaml::Mapping`] rather than a typed policy struct:
//! only `semantic.cases[*].examples[*]` is ever touched, and every other key has to survive the
//! round trip in its original order, including keys this tool has never heard of.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{EnrichError, Location};

/// An in-memory policy document with its key order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    root: Mapping,
}

impl Document {
    /// Reads and parses the document at `path`.
    pub fn load(path: &Path) -> Result<Self, EnrichError> {
        if !path.exists() {
            return Err(EnrichError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| EnrichError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = Self::from_yaml(&content)?;
        info!(path = %path.display(), keys = doc.root.len(), "policy document loaded");
        Ok(doc)
    }

    /// Parses a document from YAML text. An empty document is an empty mapping.
    pub fn from_yaml(yaml: &str) -> Result<Self, EnrichError> {
        match serde_yaml::from_str::<Value>(yaml)? {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(EnrichError::schema(
                Location::Root,
                format!("expected a mapping, found {}", value_kind(&other)),
            )),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.root)
    }

    /// Writes the document to `path`.
    ///
    /// The YAML is written to a temporary file next to `path` and renamed over it, so a failed
    /// write never leaves a truncated policy behind. An existing destination keeps its
    /// permissions.
    pub fn save(&self, path: &Path) -> Result<(), EnrichError> {
        let yaml = self
            .to_yaml()
            .map_err(|e| write_error(path, io::Error::other(e)))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_error(path, e))?;
        tmp.write_all(yaml.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| write_error(path, e))?;
        if let Ok(meta) = fs::metadata(path) {
            if meta.is_file() {
                tmp.as_file()
                    .set_permissions(meta.permissions())
                    .map_err(|e| write_error(path, e))?;
            }
        }
        tmp.persist(path).map_err(|e| write_error(path, e.error))?;

        info!(path = %path.display(), bytes = yaml.len(), "policy document written");
        Ok(())
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.root.get_mut(key)
    }

    pub fn into_mapping(self) -> Mapping {
        self.root
    }
}

impl From<Mapping> for Document {
    fn from(root: Mapping) -> Self {
        Self { root }
    }
}

fn write_error(path: &Path, source: io::Error) -> EnrichError {
    EnrichError::Write {
        path: PathBuf::from(path),
        source,
    }
}

/// Human name of a YAML node type, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
