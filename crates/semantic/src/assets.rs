//! Where the ONNX model and its tokenizer live on disk, and how they get there.
//!
//! An asset that already exists is used as is. A missing asset with a URL is fetched once into a
//! temporary file beside its final path and renamed into place, so an interrupted download never
//! leaves a truncated model behind for the next run to trust.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    pin::pin,
};

use futures::{stream, Stream, TryStreamExt};
use reqwest::Url;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{SemanticConfig, SemanticError};

const DEFAULT_TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ModelAssets {
    pub(crate) model_path: PathBuf,
    pub(crate) tokenizer_path: PathBuf,
}

impl ModelAssets {
    /// Finds both files, downloading whichever is absent and has a URL configured.
    pub(crate) async fn resolve(cfg: &SemanticConfig) -> Result<Self, SemanticError> {
        let model = Asset {
            kind: AssetKind::Model,
            target: cfg.model_path.clone(),
            url: cfg.model_url.as_deref(),
        };
        let tokenizer = Asset {
            kind: AssetKind::Tokenizer,
            target: tokenizer_target(cfg)?,
            url: cfg.tokenizer_url.as_deref(),
        };

        Ok(Self {
            model_path: model.materialize().await?,
            tokenizer_path: tokenizer.materialize().await?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum AssetKind {
    Model,
    Tokenizer,
}

struct Asset<'a> {
    kind: AssetKind,
    target: PathBuf,
    url: Option<&'a str>,
}

impl Asset<'_> {
    async fn materialize(self) -> Result<PathBuf, SemanticError> {
        if self.target.is_file() {
            debug!(path = %self.target.display(), "asset present");
            return Ok(self.target);
        }

        let Some(url) = self.url else {
            let shown = self.target.display().to_string();
            return Err(match self.kind {
                AssetKind::Model => SemanticError::ModelNotFound(shown),
                AssetKind::Tokenizer => SemanticError::TokenizerMissing(shown),
            });
        };

        info!(url, kind = ?self.kind, target = %self.target.display(), "downloading asset");
        let bytes = download(url, &self.target).await?;
        info!(bytes, target = %self.target.display(), "asset saved");
        Ok(self.target)
    }
}

/// An explicit `tokenizer_path` wins. Otherwise the tokenizer sits next to the model, named after
/// the last segment of its URL.
fn tokenizer_target(cfg: &SemanticConfig) -> Result<PathBuf, SemanticError> {
    match (&cfg.tokenizer_path, &cfg.tokenizer_url) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(url)) => {
            let file = file_name_in_url(url).unwrap_or_else(|| DEFAULT_TOKENIZER_FILE.into());
            Ok(directory_of(&cfg.model_path).join(file))
        }
        (None, None) => Err(SemanticError::TokenizerMissing(cfg.model_name.clone())),
    }
}

fn file_name_in_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_owned)
}

fn directory_of(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn download(url: &str, target: &Path) -> Result<u64, SemanticError> {
    let response = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| SemanticError::Download(format!("{url}: {e}")))?;

    let chunks = stream::try_unfold(response, |mut response| async move {
        match response.chunk().await {
            Ok(Some(chunk)) => Ok(Some((chunk, response))),
            Ok(None) => Ok(None),
            Err(e) => Err(SemanticError::Download(e.to_string())),
        }
    });
    write_atomically(target, chunks).await
}

/// Streams `chunks` into a temporary file in `target`'s directory and renames it over `target`
/// once every chunk has arrived. On any error the temporary file is removed and `target` is left
/// as it was. Returns the number of bytes written.
pub(crate) async fn write_atomically<S, B>(target: &Path, chunks: S) -> Result<u64, SemanticError>
where
    S: Stream<Item = Result<B, SemanticError>>,
    B: AsRef<[u8]>,
{
    let dir = directory_of(target);
    fs::create_dir_all(&dir)?;
    let mut staged = NamedTempFile::new_in(&dir)?;

    let mut chunks = pin!(chunks);
    let mut written = 0u64;
    while let Some(chunk) = chunks.try_next().await? {
        let chunk = chunk.as_ref();
        staged.write_all(chunk)?;
        written += chunk.len() as u64;
    }
    if written == 0 {
        return Err(SemanticError::Download(format!(
            "empty response for {}",
            target.display()
        )));
    }

    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|e| SemanticError::Io(e.error))?;
    Ok(written)
}
