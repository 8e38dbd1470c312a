use async_trait::async_trait;
use onnxruntime::ndarray::{Array, Array2};
use onnxruntime::session::Session;
use std::cell::RefCell;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::assets::ModelAssets;
use crate::cache::{loaded_model, LoadedModel};
use crate::normalize::l2_normalize_in_place;
use crate::{Embedder, SemanticConfig, SemanticError};

/// Runs a local sentence-embedding model through ONNX Runtime.
pub struct OnnxEmbedder {
    cfg: SemanticConfig,
    assets: ModelAssets,
}

impl OnnxEmbedder {
    /// Resolves (and if needed downloads) the model assets, then loads the session on the calling
    /// thread so that a broken model fails here rather than on the first example.
    pub async fn load(cfg: &SemanticConfig) -> Result<Self, SemanticError> {
        let assets = ModelAssets::resolve(cfg).await?;
        loaded_model(&assets)?;
        Ok(Self {
            cfg: cfg.clone(),
            assets,
        })
    }

    fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        let handle = loaded_model(&self.assets)?;
        let mut vectors = run_onnx_embeddings(
            &handle,
            &[text],
            self.cfg.max_sequence_length,
            &self.cfg.pooling,
        )?;
        let mut embedding = vectors
            .pop()
            .ok_or_else(|| SemanticError::Inference("model returned no outputs".into()))?;
        if self.cfg.normalize {
            l2_normalize_in_place(&mut embedding);
        }
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    fn model_name(&self) -> &str {
        &self.cfg.model_name
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SemanticError> {
        self.embed_blocking(text)
    }
}

/// Tokenizes `texts`, runs one padded batch through the session and pools the token states.
pub(crate) fn run_onnx_embeddings<T>(
    handle: &LoadedModel,
    texts: &[T],
    max_sequence_length: usize,
    pooling: &str,
) -> Result<Vec<Vec<f32>>, SemanticError>
where
    T: AsRef<str>,
{
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let (encoded, max_len) = encode_documents(&handle.tokenizer, texts, max_sequence_length)?;
    let masks: Vec<Vec<i64>> = encoded.iter().map(|doc| doc.mask.clone()).collect();
    let (input_ids, attn_mask) = build_padded_arrays(encoded, max_len)?;
    let (flat, shape) = execute_session(&handle.session, input_ids, attn_mask)?;
    debug!(?shape, "onnx output");
    pool_hidden_states(&flat, &shape, &masks, pooling)
}

/// Collapses the model output into one vector per input.
///
/// `[batch, hidden]` outputs are already pooled. `[batch, seq, hidden]` outputs are reduced with
/// `"cls"` (first token) or `"mean"` (average over tokens whose attention mask is set).
pub(crate) fn pool_hidden_states(
    flat: &[f32],
    shape: &[usize],
    masks: &[Vec<i64>],
    pooling: &str,
) -> Result<Vec<Vec<f32>>, SemanticError> {
    let expected: usize = shape.iter().product();
    if flat.len() != expected {
        return Err(SemanticError::Inference(format!(
            "model output has {} values but shape {shape:?}",
            flat.len()
        )));
    }

    match shape {
        &[batch, hidden] => {
            if batch == 0 || hidden == 0 {
                return Ok(vec![Vec::new(); batch]);
            }
            Ok(flat.chunks(hidden).map(<[f32]>::to_vec).collect())
        }
        &[batch, seq_len, hidden] => {
            let mut pooled = Vec::with_capacity(batch);
            for b in 0..batch {
                let doc = &flat[b * seq_len * hidden..(b + 1) * seq_len * hidden];
                let vector = match pooling {
                    "cls" => doc.get(..hidden).map(<[f32]>::to_vec).unwrap_or_default(),
                    _ => {
                        let mask = masks.get(b).map(Vec::as_slice).unwrap_or(&[]);
                        mean_over_mask(doc, seq_len, hidden, mask)
                    }
                };
                pooled.push(vector);
            }
            Ok(pooled)
        }
        _ => Err(SemanticError::Inference(format!(
            "unsupported model output rank: {shape:?}"
        ))),
    }
}

fn mean_over_mask(doc: &[f32], seq_len: usize, hidden: usize, mask: &[i64]) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0usize;
    for t in 0..seq_len {
        if mask.get(t).copied().unwrap_or(0) == 0 {
            continue;
        }
        count += 1;
        for (acc, &val) in sum.iter_mut().zip(&doc[t * hidden..(t + 1) * hidden]) {
            *acc += val;
        }
    }
    let denom = count.max(1) as f32;
    for val in &mut sum {
        *val /= denom;
    }
    sum
}

struct EncodedDoc {
    ids: Vec<i64>,
    mask: Vec<i64>,
}

fn encode_documents<T>(
    tokenizer: &Tokenizer,
    texts: &[T],
    max_sequence_length: usize,
) -> Result<(Vec<EncodedDoc>, usize), SemanticError>
where
    T: AsRef<str>,
{
    let mut encoded = Vec::with_capacity(texts.len());
    let mut max_len = 0usize;

    for text in texts {
        let encoding = tokenizer
            .encode(text.as_ref(), true)
            .map_err(|e| SemanticError::Inference(e.to_string()))?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mut mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&x| x as i64)
            .collect();
        ids.truncate(max_sequence_length);
        mask.truncate(max_sequence_length);
        max_len = max_len.max(ids.len());
        encoded.push(EncodedDoc { ids, mask });
    }

    Ok((encoded, max_len))
}

fn build_padded_arrays(
    encoded: Vec<EncodedDoc>,
    max_len: usize,
) -> Result<(Array2<i64>, Array2<i64>), SemanticError> {
    let seq_len = max_len.max(1);
    let batch = encoded.len();
    let mut id_storage = Vec::with_capacity(batch * seq_len);
    let mut mask_storage = Vec::with_capacity(batch * seq_len);

    for EncodedDoc { ids, mask } in encoded {
        if ids.len() != mask.len() {
            return Err(SemanticError::Inference(
                "tokenizer produced mismatched id/mask lengths".into(),
            ));
        }
        let pad = seq_len.saturating_sub(ids.len());
        id_storage.extend(ids);
        mask_storage.extend(mask);
        id_storage.extend(std::iter::repeat_n(0, pad));
        mask_storage.extend(std::iter::repeat_n(0, pad));
    }

    let input_ids = Array::from_shape_vec((batch, seq_len), id_storage)
        .map_err(|e| SemanticError::Inference(e.to_string()))?;
    let attn_mask = Array::from_shape_vec((batch, seq_len), mask_storage)
        .map_err(|e| SemanticError::Inference(e.to_string()))?;
    Ok((input_ids, attn_mask))
}

/// Feeds the declared model inputs and returns the first output flattened with its shape.
fn execute_session(
    session: &RefCell<Session<'static>>,
    input_ids: Array2<i64>,
    attn_mask: Array2<i64>,
) -> Result<(Vec<f32>, Vec<usize>), SemanticError> {
    let (batch, seq_len) = input_ids.dim();
    let mut guard = session.borrow_mut();
    let session_ref = &mut *guard;
    let mut runtime_inputs = Vec::with_capacity(session_ref.inputs.len());
    let mut input_ids_tensor = Some(input_ids);
    let mut attn_mask_tensor = Some(attn_mask);

    for input in &session_ref.inputs {
        match input.name.as_str() {
            "input_ids" => {
                let tensor = input_ids_tensor.take().ok_or_else(|| {
                    SemanticError::InvalidConfig(
                        "model requested `input_ids` multiple times".into(),
                    )
                })?;
                runtime_inputs.push(tensor.into_dyn());
            }
            "attention_mask" => {
                let tensor = attn_mask_tensor.take().ok_or_else(|| {
                    SemanticError::InvalidConfig(
                        "model requested `attention_mask` multiple times".into(),
                    )
                })?;
                runtime_inputs.push(tensor.into_dyn());
            }
            "token_type_ids" => {
                runtime_inputs.push(Array::from_elem((batch, seq_len), 0_i64).into_dyn());
            }
            other => {
                return Err(SemanticError::Inference(format!(
                    "unsupported model input '{other}'"
                )))
            }
        }
    }

    if runtime_inputs.is_empty() {
        return Err(SemanticError::Inference(
            "model did not declare any inputs".into(),
        ));
    }

    let outputs = session_ref
        .run::<i64, f32, _>(runtime_inputs)
        .map_err(|e| SemanticError::Inference(e.to_string()))?;
    let output_tensor = outputs
        .into_iter()
        .next()
        .ok_or_else(|| SemanticError::Inference("model returned no outputs".into()))?;

    let shape = output_tensor.shape().to_vec();
    let flat: Vec<f32> = output_tensor.iter().copied().collect();
    Ok((flat, shape))
}
