//! Incremental enrichment of `semantic.cases[*].examples[*]`.
//!
//! Enrichment runs in three steps so that nothing is mutated until every vector is in hand:
//!
//! 1. [`ExampleScan::scan`] walks the document, checks its shape, and records which examples
//!    still need a vector.
//! 2. [`ExampleScan::fill`] embeds those texts, at most `jobs` at a time. The first failure
//!    aborts the run.
//! 3. [`FilledScan::apply`] writes the new vectors back by case and example index.
//!
//! [`enrich_document`] and [`enrich_file`] chain the steps.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use futures::{stream, StreamExt, TryStreamExt};
use semantic::Embedder;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::document::{value_kind, Document};
use crate::error::{EnrichError, Location};
use crate::example::{Example, ExampleView};

const SEMANTIC_KEY: &str = "semantic";
const CASES_KEY: &str = "cases";
const EXAMPLES_KEY: &str = "examples";

/// Counts gathered over one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub cases: usize,
    pub total_examples: usize,
    pub already_embedded: usize,
    pub computed: usize,
    /// Every embedding length present after the run, old and new.
    pub dimensions: BTreeSet<usize>,
}

impl EnrichReport {
    pub fn is_noop(&self) -> bool {
        self.computed == 0
    }

    pub fn has_mixed_dimensions(&self) -> bool {
        self.dimensions.len() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Embedding calls in flight at once. Values below 1 are treated as 1.
    pub jobs: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingExample {
    case: usize,
    example: usize,
    text: String,
}

impl PendingExample {
    fn location(&self) -> Location {
        Location::Example {
            case: self.case,
            example: self.example,
        }
    }
}

/// The examples of a document that still need a vector, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExampleScan {
    pending: Vec<PendingExample>,
    report: EnrichReport,
}

impl ExampleScan {
    pub fn scan(doc: &Document) -> Result<Self, EnrichError> {
        let mut scan = ExampleScan::default();
        let Some(cases) = cases(doc)? else {
            debug!("no semantic cases in document");
            return Ok(scan);
        };

        scan.report.cases = cases.len();
        for (case_idx, case) in cases.iter().enumerate() {
            let Some(examples) = examples(case, case_idx)? else {
                continue;
            };
            for (example_idx, value) in examples.iter().enumerate() {
                let location = Location::Example {
                    case: case_idx,
                    example: example_idx,
                };
                let view = ExampleView::of(value, location)?;
                scan.report.total_examples += 1;
                if view.embedding.is_some() {
                    scan.report.already_embedded += 1;
                    if let Some(dim) = view.dimension() {
                        scan.report.dimensions.insert(dim);
                    }
                } else {
                    scan.pending.push(PendingExample {
                        case: case_idx,
                        example: example_idx,
                        text: view.text.to_string(),
                    });
                }
            }
        }

        debug!(
            cases = scan.report.cases,
            examples = scan.report.total_examples,
            pending = scan.pending.len(),
            "document scanned"
        );
        Ok(scan)
    }

    /// Number of examples that will be embedded.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Counts known before embedding. `computed` is still zero.
    pub fn report(&self) -> &EnrichReport {
        &self.report
    }

    /// Ends a run that has nothing to embed.
    pub fn into_report(self) -> EnrichReport {
        finish(self.report)
    }

    /// Embeds every pending text.
    ///
    /// Up to `jobs` calls run concurrently; results keep document order regardless of which
    /// call finishes first. Identical texts are embedded once per occurrence.
    pub async fn fill<E>(self, embedder: &E, jobs: usize) -> Result<FilledScan, EnrichError>
    where
        E: Embedder + ?Sized,
    {
        let jobs = jobs.max(1);
        let vectors: Vec<Vec<f32>> = stream::iter(self.pending.iter().map(|pending| async move {
            let vector = embedder.embed(&pending.text).await.map_err(|source| {
                EnrichError::Embedding {
                    location: pending.location(),
                    source,
                }
            })?;
            debug!(location = %pending.location(), dim = vector.len(), "embedding computed");
            Ok::<_, EnrichError>(vector)
        }))
        .buffered(jobs)
        .try_collect()
        .await?;

        let vectors = self
            .pending
            .into_iter()
            .zip(vectors)
            .map(|(pending, vector)| ((pending.case, pending.example), vector))
            .collect();
        Ok(FilledScan {
            vectors,
            report: self.report,
        })
    }
}

/// Vectors for every pending example, ready to be written into the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilledScan {
    vectors: HashMap<(usize, usize), Vec<f32>>,
    report: EnrichReport,
}

impl FilledScan {
    /// Writes each vector into its example slot, upgrading legacy strings to mappings.
    ///
    /// Examples without a new vector are left untouched, as are all other keys of the case and
    /// of the document.
    pub fn apply(mut self, doc: &mut Document) -> Result<EnrichReport, EnrichError> {
        if self.vectors.is_empty() {
            return Ok(finish(self.report));
        }
        let Some(cases) = cases_mut(doc)? else {
            return Err(EnrichError::schema(
                Location::Cases,
                "examples were scanned but the document has no cases",
            ));
        };

        for (case_idx, case) in cases.iter_mut().enumerate() {
            let Some(examples) = examples_mut(case, case_idx)? else {
                continue;
            };
            for (example_idx, slot) in examples.iter_mut().enumerate() {
                let Some(vector) = self.vectors.remove(&(case_idx, example_idx)) else {
                    continue;
                };
                let location = Location::Example {
                    case: case_idx,
                    example: example_idx,
                };
                let example = Example::from_value(slot.clone(), location)?;
                *slot = example.with_embedding(&vector);
                self.report.computed += 1;
                self.report.dimensions.insert(vector.len());
            }
        }

        if let Some(&(case, example)) = self.vectors.keys().next() {
            return Err(EnrichError::schema(
                Location::Example { case, example },
                "example disappeared between scan and apply",
            ));
        }
        Ok(finish(self.report))
    }
}

fn finish(report: EnrichReport) -> EnrichReport {
    if report.has_mixed_dimensions() {
        warn!(dimensions = ?report.dimensions, "examples carry embeddings of different lengths");
    }
    report
}

/// Fills every missing embedding in `doc`.
///
/// The embedder is not called at all when nothing is missing.
pub async fn enrich_document<E>(
    doc: &mut Document,
    embedder: &E,
    options: EnrichOptions,
) -> Result<EnrichReport, EnrichError>
where
    E: Embedder + ?Sized,
{
    let scan = ExampleScan::scan(doc)?;
    if scan.pending() == 0 {
        return Ok(scan.into_report());
    }
    scan.fill(embedder, options.jobs).await?.apply(doc)
}

/// Loads `input`, enriches it, and writes the result to `output` (or back to `input`).
///
/// When nothing was computed and the destination is the input itself, the file is left alone.
pub async fn enrich_file<E>(
    input: &Path,
    output: Option<&Path>,
    embedder: &E,
    options: EnrichOptions,
) -> Result<EnrichReport, EnrichError>
where
    E: Embedder + ?Sized,
{
    let mut doc = Document::load(input)?;
    let report = enrich_document(&mut doc, embedder, options).await?;
    let destination = output.unwrap_or(input);
    if needs_write(&report, input, destination) {
        doc.save(destination)?;
    } else {
        info!(path = %input.display(), "no embeddings computed, leaving document untouched");
    }
    Ok(report)
}

/// Whether a finished run has anything to write to `destination`.
pub fn needs_write(report: &EnrichReport, input: &Path, destination: &Path) -> bool {
    !report.is_noop() || destination != input
}

fn cases(doc: &Document) -> Result<Option<&Vec<Value>>, EnrichError> {
    let semantic = match doc.get(SEMANTIC_KEY) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(semantic)) => semantic,
        Some(other) => return Err(not_a(Location::Semantic, "mapping", other)),
    };
    match semantic.get(CASES_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(cases)) => Ok(Some(cases)),
        Some(other) => Err(not_a(Location::Cases, "sequence", other)),
    }
}

fn cases_mut(doc: &mut Document) -> Result<Option<&mut Vec<Value>>, EnrichError> {
    let semantic = match doc.get_mut(SEMANTIC_KEY) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Mapping(semantic)) => semantic,
        Some(other) => return Err(not_a(Location::Semantic, "mapping", other)),
    };
    match semantic.get_mut(CASES_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(cases)) => Ok(Some(cases)),
        Some(other) => Err(not_a(Location::Cases, "sequence", other)),
    }
}

fn examples(case: &Value, case_idx: usize) -> Result<Option<&Vec<Value>>, EnrichError> {
    let Value::Mapping(fields) = case else {
        return Err(not_a(Location::Case { case: case_idx }, "mapping", case));
    };
    match fields.get(EXAMPLES_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(examples)) => Ok(Some(examples)),
        Some(other) => Err(not_a(Location::Examples { case: case_idx }, "sequence", other)),
    }
}

fn examples_mut(case: &mut Value, case_idx: usize) -> Result<Option<&mut Vec<Value>>, EnrichError> {
    let Value::Mapping(fields) = case else {
        return Err(not_a(Location::Case { case: case_idx }, "mapping", case));
    };
    match fields.get_mut(EXAMPLES_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(examples)) => Ok(Some(examples)),
        Some(other) => Err(not_a(Location::Examples { case: case_idx }, "sequence", other)),
    }
}

fn not_a(location: Location, expected: &str, found: &Value) -> EnrichError {
    EnrichError::schema(
        location,
        format!("expected a {expected}, found {}", value_kind(found)),
    )
}
