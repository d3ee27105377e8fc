use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Capacity exceeded: store holds {current} of {capacity} vectors, batch adds {requested}")]
    CapacityExceeded {
        capacity: usize,
        current: usize,
        requested: usize,
    },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VectorStoreError {
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingError(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::IndexCorruption(msg.into())
    }
}
