//! Precomputes semantic embeddings for the examples of a policy document.
//!
//! A policy's `semantic.cases[*].examples[*]` are phrases a downstream matcher compares runtime
//! text against. This crate attaches a vector to every example that does not have one yet, so
//! the matcher never has to embed them at request time. Everything else in the document is
//! written back as it was read, in the same key order.
//!
//! Runs are incremental: examples that already carry an `embedding` are left alone, and a
//! second run over an enriched document computes nothing.
//!
//! ```no_run
//! use policy_embed::{enrich_file, EnrichOptions};
//! use semantic::StubEmbedder;
//! use std::path::Path;
//!
//! # async fn run() -> Result<(), policy_embed::EnrichError> {
//! let report = enrich_file(
//!     Path::new("policy.yaml"),
//!     None,
//!     &StubEmbedder::new(384),
//!     EnrichOptions::default(),
//! )
//! .await?;
//! println!("computed {} embeddings", report.computed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod enrich;
pub mod error;
pub mod example;

pub use crate::config::{ConfigLoadError, Overrides, ResolvedConfig, ToolConfig};
pub use crate::document::Document;
pub use crate::enrich::{
    enrich_document, enrich_file, needs_write, EnrichOptions, EnrichReport, ExampleScan,
    FilledScan,
};
pub use crate::error::{EnrichError, Location};
pub use crate::example::{Example, ExampleView};
