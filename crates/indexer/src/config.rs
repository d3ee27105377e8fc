use crate::error::{IndexerError, Result};
use semindex_chunker::ChunkerConfig;
use semindex_search::SearchConfig;
use semindex_vector_store::{EmbeddingBackendKind, EmbeddingConfig, IndexKind, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "SEMINDEX_";

/// Indexing policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// A run whose embedding failure ratio is strictly above this rolls back
    pub max_failure_rate: f64,
    /// Background save period; 0 disables the persistence task
    pub persist_interval_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_failure_rate: 0.20,
            persist_interval_secs: 30,
        }
    }
}

impl IndexingConfig {
    #[must_use]
    pub fn persist_interval(&self) -> Option<Duration> {
        (self.persist_interval_secs > 0).then(|| Duration::from_secs(self.persist_interval_secs))
    }
}

/// Full engine configuration, one TOML section per component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunker: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub indexing: IndexingConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| IndexerError::Config(format!("invalid TOML: {e}")))
    }

    /// Build the effective configuration: defaults, then the optional TOML
    /// file, then `SEMINDEX_*` environment variables. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    IndexerError::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                log::info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides looked up by unprefixed key (e.g. `CHUNK_SIZE`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MAX_VECTORS") {
            self.store.max_vectors = parse_var("MAX_VECTORS", &v)?;
        }
        if let Some(v) = get("INDEX_KIND") {
            self.store.index_kind = IndexKind::parse(&v)
                .ok_or_else(|| IndexerError::Config(format!("{ENV_PREFIX}INDEX_KIND: unknown kind '{v}'")))?;
        }

        if let Some(v) = get("EMBEDDING_BACKEND") {
            self.embedding.backend = EmbeddingBackendKind::parse(&v).ok_or_else(|| {
                IndexerError::Config(format!("{ENV_PREFIX}EMBEDDING_BACKEND: unknown backend '{v}'"))
            })?;
        }
        if let Some(v) = get("MODEL_ID") {
            self.embedding.model_id = v;
        }
        if let Some(v) = get("MODEL_DIR") {
            self.embedding.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("EMBEDDING_DIMENSION") {
            self.embedding.dimension = parse_var("EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.embedding.batch_size = parse_var("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_SEQUENCE_LENGTH") {
            self.embedding.max_sequence_length = parse_var("MAX_SEQUENCE_LENGTH", &v)?;
        }
        if let Some(v) = get("EMBEDDING_WORKERS") {
            self.embedding.workers = parse_var("EMBEDDING_WORKERS", &v)?;
        }

        if let Some(v) = get("CHUNK_SIZE") {
            self.chunker.chunk_size = parse_var("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_OVERLAP") {
            self.chunker.overlap = parse_var("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("MIN_CHUNK_CHARS") {
            self.chunker.min_chunk_chars = parse_var("MIN_CHUNK_CHARS", &v)?;
        }

        if let Some(v) = get("SIMILARITY_THRESHOLD") {
            self.search.default_threshold = parse_var("SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("MAX_RESULTS") {
            self.search.max_top_k = parse_var("MAX_RESULTS", &v)?;
        }
        if let Some(v) = get("DEFAULT_RESULTS") {
            self.search.default_top_k = parse_var("DEFAULT_RESULTS", &v)?;
        }

        if let Some(v) = get("MAX_FAILURE_RATE") {
            self.indexing.max_failure_rate = parse_var("MAX_FAILURE_RATE", &v)?;
        }
        if let Some(v) = get("PERSIST_INTERVAL_SECS") {
            self.indexing.persist_interval_secs = parse_var("PERSIST_INTERVAL_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            self.chunker.validate().map_err(|e| format!("chunker: {e}")),
            self.embedding.validate(),
            self.store.validate(),
            self.search.validate(),
            self.validate_indexing(),
        ];
        for check in checks {
            check.map_err(IndexerError::Config)?;
        }
        Ok(())
    }

    fn validate_indexing(&self) -> std::result::Result<(), String> {
        let rate = self.indexing.max_failure_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(format!("indexing.max_failure_rate must be in [0, 1] (got {rate})"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| IndexerError::Config(format!("{ENV_PREFIX}{key}: cannot parse '{raw}': {e}")))
}
