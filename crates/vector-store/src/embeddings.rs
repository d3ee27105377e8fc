use crate::config::{EmbeddingBackendKind, EmbeddingConfig};
use crate::error::{Result, VectorStoreError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{spawn_blocking, JoinSet};

/// Weight of a whole-word feature.
const WORD_WEIGHT: f32 = 1.0;
/// Weight of a character trigram feature. Trigrams let related word forms
/// ("traitement" / "treatment", "hypertension" / "hypertensive") share mass.
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Text-to-vector inference seam.
///
/// Implementations are blocking; [`EmbeddingModel`] runs them on the
/// blocking thread pool.
pub trait EmbeddingBackend: Send + Sync {
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed a whole batch. An error means the batch as a whole failed.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text; used to isolate the bad item of a failed batch.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        match (out.pop(), out.is_empty()) {
            (Some(vector), true) => Ok(vector),
            _ => Err(VectorStoreError::embedding(
                "backend returned an unexpected number of vectors",
            )),
        }
    }
}

/// Deterministic feature-hashing embedder: lowercased word unigrams plus
/// character trigrams of `^word$`, hashed into `dimension` buckets and L2
/// normalized. All feature weights are positive, so similarities between
/// two of its vectors fall in `[0, 1]`.
pub struct HashingBackend {
    id: String,
    dimension: usize,
}

impl HashingBackend {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            id: format!("hashing-{dimension}"),
            dimension,
        }
    }

    fn bucket(&self, namespace: u8, feature: &[u8]) -> usize {
        let mut state = fnv1a_64(feature) ^ u64::from(namespace).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (splitmix64(&mut state) % self.dimension as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dimension];
        let mut words = 0usize;

        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            if raw.is_empty() {
                continue;
            }
            let word = raw.to_lowercase();
            vec[self.bucket(b'w', word.as_bytes())] += WORD_WEIGHT;

            let marked: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for window in marked.windows(3) {
                let trigram: String = window.iter().collect();
                vec[self.bucket(b't', trigram.as_bytes())] += TRIGRAM_WEIGHT;
            }
            words += 1;
        }

        if words == 0 {
            return Err(VectorStoreError::embedding("text has no encodable tokens"));
        }
        normalize(&mut vec);
        Ok(vec)
    }
}

impl EmbeddingBackend for HashingBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingFailure {
    /// Position of the failed text in the input slice
    pub index: usize,
    pub reason: String,
}

/// Result of embedding many texts: successful vectors keyed by input
/// position, plus the inputs that could not be embedded.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBatch {
    pub vectors: Vec<(usize, Vec<f32>)>,
    pub failures: Vec<EmbeddingFailure>,
}

impl EmbeddedBatch {
    #[must_use]
    pub fn total(&self) -> usize {
        self.vectors.len() + self.failures.len()
    }

    /// Fold a batch produced for `texts[offset..]` into this one.
    pub fn absorb(&mut self, other: Self, offset: usize) {
        self.vectors.extend(
            other
                .vectors
                .into_iter()
                .map(|(idx, vector)| (idx + offset, vector)),
        );
        self.failures
            .extend(other.failures.into_iter().map(|failure| EmbeddingFailure {
                index: failure.index + offset,
                reason: failure.reason,
            }));
    }

    fn sort(&mut self) {
        self.vectors.sort_by_key(|(idx, _)| *idx);
        self.failures.sort_by_key(|f| f.index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub backend: String,
    pub model_id: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_sequence_length: usize,
    pub workers: usize,
}

/// Batched embedding generator on a bounded worker pool.
pub struct EmbeddingModel {
    backend: Arc<dyn EmbeddingBackend>,
    backend_kind: EmbeddingBackendKind,
    model_id: String,
    dimension: usize,
    batch_size: usize,
    max_sequence_length: usize,
    workers: usize,
    permits: Arc<Semaphore>,
}

impl EmbeddingModel {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        config.validate().map_err(VectorStoreError::InvalidConfig)?;
        let backend: Arc<dyn EmbeddingBackend> = match config.backend {
            EmbeddingBackendKind::Hashing => Arc::new(HashingBackend::new(config.dimension)),
            EmbeddingBackendKind::Onnx => load_onnx_backend(config)?,
        };
        if backend.dimension() != config.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: config.dimension,
                actual: backend.dimension(),
            });
        }
        Ok(Self::with_backend(backend, config))
    }

    /// Wrap an arbitrary backend; batch size and pool size come from `config`.
    pub fn with_backend(backend: Arc<dyn EmbeddingBackend>, config: &EmbeddingConfig) -> Self {
        let workers = config.effective_workers();
        let model_id = match config.backend {
            EmbeddingBackendKind::Hashing => backend.id().to_string(),
            EmbeddingBackendKind::Onnx => config.model_id.clone(),
        };
        log::info!(
            "Embedding model ready: backend={} id={} dim={} batch={} workers={}",
            config.backend.as_str(),
            model_id,
            backend.dimension(),
            config.batch_size,
            workers
        );
        Self {
            dimension: backend.dimension(),
            backend,
            backend_kind: config.backend,
            model_id,
            batch_size: config.batch_size.max(1),
            max_sequence_length: config.max_sequence_length,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            backend: self.backend_kind.as_str().to_string(),
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            batch_size: self.batch_size,
            max_sequence_length: self.max_sequence_length,
            workers: self.workers,
        }
    }

    /// Embed a search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(VectorStoreError::embedding("query text is empty"));
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| VectorStoreError::embedding(format!("embedding pool closed: {e}")))?;
        let backend = Arc::clone(&self.backend);
        let owned = text.to_string();
        let dimension = self.dimension;
        spawn_blocking(move || {
            backend
                .embed_one(&owned)
                .and_then(|v| validate_vector(v, dimension))
        })
        .await
        .map_err(|e| VectorStoreError::embedding(format!("Join error: {e}")))?
    }

    /// Embed many texts. Never fails as a whole: texts that cannot be
    /// embedded are reported in [`EmbeddedBatch::failures`].
    pub async fn embed_texts(&self, texts: &[String]) -> EmbeddedBatch {
        let mut batch = EmbeddedBatch::default();
        if texts.is_empty() {
            return batch;
        }

        let mut tasks = JoinSet::new();
        for (group_idx, group) in texts.chunks(self.batch_size).enumerate() {
            let offset = group_idx * self.batch_size;
            let group = group.to_vec();
            let backend = Arc::clone(&self.backend);
            let permits = Arc::clone(&self.permits);
            let dimension = self.dimension;
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let joined =
                    spawn_blocking(move || embed_group(backend.as_ref(), &group, dimension)).await;
                (offset, joined)
            });
        }

        let mut seen = vec![false; texts.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((offset, Ok(group))) => {
                    for idx in group
                        .vectors
                        .iter()
                        .map(|(i, _)| *i)
                        .chain(group.failures.iter().map(|f| f.index))
                    {
                        seen[idx + offset] = true;
                    }
                    batch.absorb(group, offset);
                }
                Ok((offset, Err(err))) => {
                    log::error!("Embedding worker for batch at {offset} aborted: {err}");
                }
                Err(err) => {
                    log::error!("Embedding task aborted: {err}");
                }
            }
        }

        for (index, done) in seen.into_iter().enumerate() {
            if !done {
                batch.failures.push(EmbeddingFailure {
                    index,
                    reason: "embedding worker aborted".to_string(),
                });
            }
        }

        batch.sort();
        log::debug!(
            "Embedded {} texts: {} vectors, {} failures",
            texts.len(),
            batch.vectors.len(),
            batch.failures.len()
        );
        batch
    }
}

/// Embed one batch; on whole-batch failure retry each item alone so a
/// single bad input only costs itself.
fn embed_group(backend: &dyn EmbeddingBackend, texts: &[String], dimension: usize) -> EmbeddedBatch {
    let mut out = EmbeddedBatch::default();

    let reason = match backend.embed_batch(texts) {
        Ok(vectors) if vectors.len() == texts.len() => {
            for (idx, vector) in vectors.into_iter().enumerate() {
                match validate_vector(vector, dimension) {
                    Ok(vector) => out.vectors.push((idx, vector)),
                    Err(err) => {
                        log::warn!("Discarding invalid embedding for input {idx}: {err}");
                        out.failures.push(EmbeddingFailure {
                            index: idx,
                            reason: err.to_string(),
                        });
                    }
                }
            }
            return out;
        }
        Ok(vectors) => format!(
            "backend returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        ),
        Err(err) => err.to_string(),
    };

    if texts.len() > 1 {
        log::debug!(
            "Batch of {} failed ({reason}); retrying items individually",
            texts.len()
        );
    }

    for (idx, text) in texts.iter().enumerate() {
        let single = if texts.len() == 1 {
            Err(VectorStoreError::EmbeddingError(reason.clone()))
        } else {
            backend.embed_one(text)
        };
        match single.and_then(|v| validate_vector(v, dimension)) {
            Ok(vector) => out.vectors.push((idx, vector)),
            Err(err) => {
                log::warn!("Embedding failed for input {idx}: {err}");
                out.failures.push(EmbeddingFailure {
                    index: idx,
                    reason: err.to_string(),
                });
            }
        }
    }
    out
}

/// Check dimension and finiteness, then scale to unit length.
pub fn validate_vector(mut vector: Vec<f32>, dimension: usize) -> Result<Vec<f32>> {
    if vector.len() != dimension {
        return Err(VectorStoreError::InvalidDimension {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(VectorStoreError::InvalidVector(
            "vector contains non-finite values".to_string(),
        ));
    }
    if !normalize(&mut vector) {
        return Err(VectorStoreError::InvalidVector("zero-length vector".to_string()));
    }
    Ok(vector)
}

/// L2-normalize in place. Returns false for the zero vector.
pub fn normalize(vec: &mut [f32]) -> bool {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for value in vec {
        *value /= norm;
    }
    true
}

#[cfg(feature = "onnx")]
fn load_onnx_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    Ok(Arc::new(crate::onnx::OnnxBackend::load(config)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx_backend(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    Err(VectorStoreError::InvalidConfig(
        "embedding.backend = \"onnx\" requires building with the `onnx` feature".to_string(),
    ))
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn config(batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            workers: 2,
            ..EmbeddingConfig::default()
        }
    }

    /// Fails any batch containing "POISON" and counts calls.
    struct FlakyBackend {
        inner: HashingBackend,
        batch_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: HashingBackend::new(384),
                batch_calls: AtomicUsize::new(0),
                single_calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingBackend for FlakyBackend {
        fn id(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            384
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("POISON")) {
                return Err(VectorStoreError::embedding("inference failed"));
            }
            self.inner.embed_batch(texts)
        }

        fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("POISON") {
                return Err(VectorStoreError::embedding("inference failed"));
            }
            self.inner.embed_one(text)
        }
    }

    #[test]
    fn hashing_is_deterministic_and_unit_length() {
        let backend = HashingBackend::new(384);
        let a = backend.embed_one("Patient has hypertension.").unwrap();
        let b = backend.embed_one("Patient has hypertension.").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_ignores_case_and_punctuation() {
        let backend = HashingBackend::new(384);
        let a = backend.embed_one("HYPERTENSION, treated!").unwrap();
        let b = backend.embed_one("hypertension treated").unwrap();
        assert!((dot(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated() {
        let backend = HashingBackend::new(384);
        let query = backend.embed_one("traitement hypertension").unwrap();
        let related = backend.embed_one("Patient has hypertension.").unwrap();
        let unrelated = backend.embed_one("Fractured left wrist, cast applied.").unwrap();
        let related_score = dot(&query, &related);
        assert!(related_score >= 0.3, "score {related_score}");
        assert!(related_score > dot(&query, &unrelated));
    }

    #[test]
    fn text_without_tokens_fails() {
        let backend = HashingBackend::new(16);
        assert!(backend.embed_one("*** --- ...").is_err());
        assert!(backend.embed_batch(&["ok".to_string(), "***".to_string()]).is_err());
    }

    #[test]
    fn validate_vector_rejects_bad_input() {
        assert!(matches!(
            validate_vector(vec![1.0, 0.0], 3),
            Err(VectorStoreError::InvalidDimension { expected: 3, actual: 2 })
        ));
        assert!(validate_vector(vec![f32::NAN, 1.0], 2).is_err());
        assert!(validate_vector(vec![0.0, 0.0], 2).is_err());
        let v = validate_vector(vec![3.0, 4.0], 2).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embed_texts_isolates_failed_items() {
        let model = EmbeddingModel::from_config(&config(4)).unwrap();
        let texts: Vec<String> = vec![
            "Chest pain on exertion.".into(),
            "***".into(),
            "ECG normal.".into(),
            "Troponin negative.".into(),
            "Discharged.".into(),
        ];
        let batch = model.embed_texts(&texts).await;
        assert_eq!(batch.total(), 5);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].index, 1);
        let indices: Vec<usize> = batch.vectors.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_batch_is_retried_item_by_item() {
        let backend = Arc::new(FlakyBackend::new());
        let model = EmbeddingModel::with_backend(backend.clone(), &config(3));
        let texts: Vec<String> = (0..7)
            .map(|i| {
                if i == 4 {
                    "POISON".to_string()
                } else {
                    format!("note number {i}")
                }
            })
            .collect();

        let batch = model.embed_texts(&texts).await;
        assert_eq!(batch.vectors.len(), 6);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].index, 4);
        // 3 groups of at most 3; only the group holding index 4 is retried.
        assert_eq!(backend.batch_calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.single_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn embed_query_rejects_empty_text() {
        let model = EmbeddingModel::from_config(&config(8)).unwrap();
        assert!(model.embed_query("   ").await.is_err());
        let v = model.embed_query("hypertension").await.unwrap();
        assert_eq!(v.len(), model.dimension());
    }

    #[test]
    fn model_info_reports_configuration() {
        let model = EmbeddingModel::from_config(&config(16)).unwrap();
        let info = model.model_info();
        assert_eq!(info.backend, "hashing");
        assert_eq!(info.dimension, 384);
        assert_eq!(info.batch_size, 16);
        assert_eq!(info.workers, 2);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn onnx_backend_requires_feature() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackendKind::Onnx,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            EmbeddingModel::from_config(&config),
            Err(VectorStoreError::InvalidConfig(_))
        ));
    }
}
