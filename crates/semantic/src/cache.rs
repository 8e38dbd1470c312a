//! Loaded ONNX models, one copy per thread.
//!
//! An `onnxruntime` session is neither `Send` nor `Sync`, so every thread that embeds owns its
//! sessions. The runtime environment they borrow from is created once for the process.

use std::{cell::RefCell, hash::Hash, rc::Rc, thread, time::Instant};

use fxhash::FxHashMap;
use once_cell::sync::OnceCell;
use onnxruntime::{environment::Environment, session::Session, GraphOptimizationLevel};
use tokenizers::Tokenizer;
use tracing::info;

use crate::assets::ModelAssets;
use crate::SemanticError;

static ORT_ENV: OnceCell<Environment> = OnceCell::new();

thread_local! {
    static MODELS: LocalCache<ModelAssets, LoadedModel> = LocalCache::default();
}

/// A single-thread memo of values that are expensive to build and cannot leave their thread.
///
/// Failed loads are not remembered, so the next call retries.
pub(crate) struct LocalCache<K, V> {
    entries: RefCell<FxHashMap<K, Rc<V>>>,
}

impl<K, V> Default for LocalCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(FxHashMap::default()),
        }
    }
}

impl<K, V> LocalCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Returns the value stored for `key`, building it with `load` on a miss.
    ///
    /// The map is not borrowed while `load` runs.
    pub(crate) fn get_or_try_load<E, F>(&self, key: &K, load: F) -> Result<Rc<V>, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(hit) = self.entries.borrow().get(key) {
            return Ok(Rc::clone(hit));
        }
        let value = Rc::new(load(key)?);
        self.entries
            .borrow_mut()
            .insert(key.clone(), Rc::clone(&value));
        Ok(value)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

pub(crate) struct LoadedModel {
    pub(crate) tokenizer: Tokenizer,
    pub(crate) session: RefCell<Session<'static>>,
}

impl LoadedModel {
    fn load(assets: &ModelAssets) -> Result<Self, SemanticError> {
        let started = Instant::now();
        let tokenizer = Tokenizer::from_file(&assets.tokenizer_path).map_err(|e| {
            SemanticError::Inference(format!(
                "failed to load tokenizer {}: {e}",
                assets.tokenizer_path.display()
            ))
        })?;

        let session = ort_environment()?
            .new_session_builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Basic))
            .and_then(|builder| builder.with_model_from_file(assets.model_path.clone()))
            .map_err(|e| {
                SemanticError::Inference(format!(
                    "failed to load model {}: {e}",
                    assets.model_path.display()
                ))
            })?;

        info!(
            model = %assets.model_path.display(),
            thread = thread::current().name().unwrap_or("unnamed"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "onnx session loaded"
        );
        Ok(Self {
            tokenizer,
            session: RefCell::new(session),
        })
    }
}

/// The calling thread's copy of the model behind `assets`, loaded on first use.
pub(crate) fn loaded_model(assets: &ModelAssets) -> Result<Rc<LoadedModel>, SemanticError> {
    MODELS.with(|models| models.get_or_try_load(assets, LoadedModel::load))
}

fn ort_environment() -> Result<&'static Environment, SemanticError> {
    ORT_ENV.get_or_try_init(|| {
        Environment::builder()
            .with_name("policy-embed")
            .build()
            .map_err(|e| SemanticError::Inference(format!("onnx runtime unavailable: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn value_is_built_once_per_key() {
        let cache: LocalCache<&str, String> = LocalCache::default();
        let loads = Cell::new(0);
        let load = |key: &&str| {
            loads.set(loads.get() + 1);
            Ok::<_, SemanticError>(key.to_uppercase())
        };

        let first = cache.get_or_try_load(&"mini", load).unwrap();
        let again = cache.get_or_try_load(&"mini", load).unwrap();
        let other = cache.get_or_try_load(&"large", load).unwrap();

        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(*other, "LARGE");
        assert_eq!(loads.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_load_is_retried() {
        let cache: LocalCache<u8, u8> = LocalCache::default();

        let err = cache
            .get_or_try_load(&1, |_| Err(SemanticError::Inference("corrupt model".into())))
            .unwrap_err();
        assert!(err.to_string().contains("corrupt model"));
        assert_eq!(cache.len(), 0);

        let value = cache.get_or_try_load(&1, |_| Ok::<_, SemanticError>(7)).unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn loader_may_use_the_same_cache() {
        let cache: LocalCache<u8, u8> = LocalCache::default();
        let value = cache
            .get_or_try_load(&2, |_| {
                let inner = cache.get_or_try_load(&1, |_| Ok::<_, SemanticError>(1))?;
                Ok::<_, SemanticError>(*inner + 1)
            })
            .unwrap();
        assert_eq!(*value, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn missing_tokenizer_names_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let assets = ModelAssets {
            model_path: dir.path().join("model.onnx"),
            tokenizer_path: dir.path().join("tokenizer.json"),
        };
        let err = loaded_model(&assets).err().unwrap();
        assert!(matches!(err, SemanticError::Inference(_)));
        assert!(err.to_string().contains("tokenizer.json"));
    }
}
