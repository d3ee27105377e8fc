use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MAX_EMBEDDING_WORKERS: usize = 32;

pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_DIMENSION: usize = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    /// Deterministic feature hashing, no model files required
    Hashing,
    /// Sentence-transformer ONNX model (requires the `onnx` feature)
    Onnx,
}

impl EmbeddingBackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hashing => "hashing",
            Self::Onnx => "onnx",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hashing" | "hash" | "stub" => Some(Self::Hashing),
            "onnx" | "ort" => Some(Self::Onnx),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackendKind,
    pub model_id: String,
    /// Directory holding `model.onnx` and `tokenizer.json` for the ONNX backend
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_sequence_length: usize,
    /// Concurrent embedding batches; 0 derives it from available parallelism
    pub workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::Hashing,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_dir: PathBuf::from("./models").join(DEFAULT_MODEL_ID),
            dimension: DEFAULT_DIMENSION,
            batch_size: 32,
            max_sequence_length: 512,
            workers: 0,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("embedding.dimension must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("embedding.batch_size must be > 0".to_string());
        }
        if self.max_sequence_length == 0 {
            return Err("embedding.max_sequence_length must be > 0".to_string());
        }
        if self.workers > MAX_EMBEDDING_WORKERS {
            return Err(format!(
                "embedding.workers must be <= {MAX_EMBEDDING_WORKERS} (got {})",
                self.workers
            ));
        }
        if self.model_id.trim().is_empty() {
            return Err("embedding.model_id must not be empty".to_string());
        }
        Ok(())
    }

    /// Worker pool size, clamped to `[1, 32]`.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        let requested = if self.workers == 0 {
            default_workers()
        } else {
            self.workers
        };
        requested.clamp(1, MAX_EMBEDDING_WORKERS)
    }
}

fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    // Leave headroom for request handling on small machines.
    if cpus <= 2 {
        1
    } else {
        cpus / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    BruteForce,
}

impl IndexKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BruteForce => "brute_force",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "brute_force" | "bruteforce" | "flat" | "exact" => Some(Self::BruteForce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub index_file: String,
    pub corpus_file: String,
    pub max_vectors: usize,
    pub index_kind: IndexKind,
    /// Candidate multiplier for indexes that filter after scoring
    pub overfetch_factor: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/vectors"),
            index_file: "index.semidx".to_string(),
            corpus_file: "corpus.json".to_string(),
            max_vectors: 1_000_000,
            index_kind: IndexKind::BruteForce,
            overfetch_factor: 4,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_vectors == 0 {
            return Err("store.max_vectors must be > 0".to_string());
        }
        if self.overfetch_factor == 0 {
            return Err("store.overfetch_factor must be > 0".to_string());
        }
        for (name, value) in [
            ("store.index_file", &self.index_file),
            ("store.corpus_file", &self.corpus_file),
        ] {
            if value.trim().is_empty() || Path::new(value).components().count() != 1 {
                return Err(format!("{name} must be a plain file name (got '{value}')"));
            }
        }
        if self.index_file == self.corpus_file {
            return Err("store.index_file and store.corpus_file must differ".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    #[must_use]
    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join(&self.corpus_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EmbeddingConfig::default().validate().is_ok());
        assert!(StoreConfig::default().validate().is_ok());
        assert_eq!(EmbeddingConfig::default().dimension, 384);
        assert_eq!(StoreConfig::default().max_vectors, 1_000_000);
    }

    #[test]
    fn workers_are_clamped() {
        let mut config = EmbeddingConfig::default();
        let auto = config.effective_workers();
        assert!((1..=MAX_EMBEDDING_WORKERS).contains(&auto));

        config.workers = 3;
        assert_eq!(config.effective_workers(), 3);

        config.workers = 64;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_names_must_be_plain() {
        let config = StoreConfig {
            index_file: "../index.semidx".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            corpus_file: "index.semidx".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn kinds_parse_from_strings() {
        assert_eq!(EmbeddingBackendKind::parse("ONNX"), Some(EmbeddingBackendKind::Onnx));
        assert_eq!(EmbeddingBackendKind::parse("hashing"), Some(EmbeddingBackendKind::Hashing));
        assert_eq!(EmbeddingBackendKind::parse("bert"), None);
        assert_eq!(IndexKind::parse("brute_force"), Some(IndexKind::BruteForce));
        assert_eq!(IndexKind::parse("hnsw"), None);
    }
}
