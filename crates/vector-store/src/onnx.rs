//! Sentence-transformer embeddings on ONNX Runtime.
//!
//! Expects `model.onnx` and `tokenizer.json` in `EmbeddingConfig::model_dir`
//! (e.g. an export of `all-MiniLM-L6-v2`). Token embeddings are mean-pooled
//! over the attention mask and L2 normalized.

use crate::config::EmbeddingConfig;
use crate::embeddings::{normalize, EmbeddingBackend};
use crate::error::{Result, VectorStoreError};
use ndarray::{Array, Axis, Ix2, Ix3};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionInputs};
use ort::value::{DynTensor, Tensor};
use std::collections::HashMap;
use std::sync::Mutex;
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

pub struct OnnxBackend {
    id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OnnxBackend {
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let model_path = config.model_dir.join("model.onnx");
        let tokenizer_path = config.model_dir.join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(VectorStoreError::embedding(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {}.",
                config.model_id,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorStoreError::embedding(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| VectorStoreError::embedding(format!("Tokenizer truncation failed: {e}")))?;

        let session = Session::builder()
            .map_err(to_embedding_error)?
            .with_intra_threads(1)
            .map_err(to_embedding_error)?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(to_embedding_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(to_embedding_error)?
            .commit_from_file(&model_path)
            .map_err(|e| VectorStoreError::embedding(format!("Failed to load ONNX model: {e}")))?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            config.model_id,
            config.dimension,
            config.max_sequence_length,
            config.batch_size
        );

        Ok(Self {
            id: config.model_id.clone(),
            session: Mutex::new(session),
            tokenizer,
            max_length: config.max_sequence_length,
            max_batch: config.batch_size,
            dimension: config.dimension,
        })
    }

    fn run_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(batch.to_vec(), true)
            .map_err(|e| VectorStoreError::embedding(format!("Tokenization failed: {e}")))?;
        if encodings.is_empty() {
            return Ok(Vec::new());
        }

        let seq_len = encodings[0].len();
        if seq_len > self.max_length || encodings.iter().any(|e| e.len() != seq_len) {
            return Err(VectorStoreError::embedding(format!(
                "Unexpected tokenized length {seq_len} (max {})",
                self.max_length
            )));
        }
        let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

        let mut available: HashMap<&str, DynTensor> = HashMap::new();
        for (name, values) in [
            ("input_ids", ids),
            ("attention_mask", masks),
            ("token_type_ids", type_ids),
        ] {
            let array = Array::from_shape_vec((batch.len(), seq_len), values)
                .map_err(|e| VectorStoreError::embedding(format!("{name} shape error: {e}")))?;
            let tensor = Tensor::from_array(array.into_dyn())
                .map_err(to_embedding_error)?
                .upcast();
            available.insert(name, tensor);
        }

        let array = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| VectorStoreError::embedding("Failed to lock ONNX session"))?;

            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            for input in &session.inputs {
                let tensor = available.remove(input.name.as_str()).ok_or_else(|| {
                    VectorStoreError::embedding(format!("Unsupported ONNX input '{}'", input.name))
                })?;
                feed.insert(input.name.clone(), tensor);
            }

            let outputs = session
                .run(SessionInputs::from(feed))
                .map_err(|e| VectorStoreError::embedding(format!("ONNX forward failed: {e}")))?;
            if outputs.len() == 0 {
                return Err(VectorStoreError::embedding("ONNX returned no outputs"));
            }
            outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| {
                    VectorStoreError::embedding(format!("Failed to decode ONNX output: {e}"))
                })?
                .to_owned()
        };

        embeddings_from_output(array, &mask_rows, self.dimension)
    }
}

impl EmbeddingBackend for OnnxBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch.max(1)) {
            results.extend(self.run_batch(batch)?);
        }
        Ok(results)
    }
}

fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let bad_shape = |e: ndarray::ShapeError| VectorStoreError::embedding(format!("Bad output shape: {e}"));
    let mut out = Vec::new();
    match array.ndim() {
        // Already pooled: [batch, hidden]
        2 => {
            let embeddings = array.into_dimensionality::<Ix2>().map_err(bad_shape)?;
            for row in embeddings.outer_iter() {
                out.push(row.to_vec());
            }
        }
        // Token states: [batch, seq, hidden]
        3 => {
            let hidden = array.into_dimensionality::<Ix3>().map_err(bad_shape)?;
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let mask = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                out.push(mean_pool(sample.view(), &mask));
            }
        }
        _ => {
            return Err(VectorStoreError::embedding(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }

    for emb in &mut out {
        if emb.len() != expected_dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: expected_dimension,
                actual: emb.len(),
            });
        }
        normalize(emb);
    }
    Ok(out)
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let mut sum = vec![0.0f32; sample.len_of(Axis(1))];
    let mut count = 0.0f32;
    for (token_idx, token) in sample.outer_iter().enumerate() {
        if mask.get(token_idx).copied().unwrap_or(0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }
    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let row_ids = encoding.get_ids();
        let row_mask = encoding.get_attention_mask();
        let row_types = encoding.get_type_ids();
        for idx in 0..seq_len {
            ids.push(i64::from(row_ids.get(idx).copied().unwrap_or(0)));
            masks.push(i64::from(row_mask.get(idx).copied().unwrap_or(0)));
            type_ids.push(i64::from(row_types.get(idx).copied().unwrap_or(0)));
        }
        mask_rows.push(row_mask.iter().take(seq_len).map(|v| i64::from(*v)).collect());
    }

    (ids, masks, type_ids, mask_rows)
}

fn to_embedding_error(error: ort::Error) -> VectorStoreError {
    VectorStoreError::embedding(error.to_string())
}
