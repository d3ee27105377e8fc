use semindex_chunker::ChunkerError;
use semindex_protocol::codes;
use semindex_search::SearchError;
use semindex_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Vector store error: {0}")]
    Store(#[from] VectorStoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] ChunkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Stable code for the wire error envelope.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => codes::VALIDATION,
            Self::Capacity(_) => codes::CAPACITY,
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::Store(err) => store_code(err),
            Self::Search(SearchError::InvalidQuery(_)) => codes::INVALID_QUERY,
            Self::Search(SearchError::VectorStoreError(err)) => store_code(err),
            Self::Chunker(ChunkerError::EmptyContent) => codes::VALIDATION,
            Self::Config(_) | Self::Chunker(_) | Self::Io(_) | Self::Other(_) => codes::INTERNAL,
        }
    }
}

fn store_code(err: &VectorStoreError) -> &'static str {
    match err {
        VectorStoreError::CapacityExceeded { .. } => codes::CAPACITY,
        VectorStoreError::IndexCorruption(_) | VectorStoreError::IndexUnavailable(_) => {
            codes::INDEX_CORRUPTION
        }
        VectorStoreError::EmbeddingError(_) => codes::EMBEDDING,
        VectorStoreError::InvalidDimension { .. } | VectorStoreError::InvalidVector(_) => {
            codes::VALIDATION
        }
        VectorStoreError::IoError(_)
        | VectorStoreError::SerializationError(_)
        | VectorStoreError::InvalidConfig(_) => codes::INTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_failing_layer() {
        assert_eq!(IndexerError::validation("x").code(), "validation_error");
        assert_eq!(
            IndexerError::from(VectorStoreError::corruption("bad checksum")).code(),
            "index_corruption"
        );
        assert_eq!(
            IndexerError::from(SearchError::invalid("limit")).code(),
            "invalid_query"
        );
        assert_eq!(
            IndexerError::from(SearchError::from(VectorStoreError::embedding("no tokens"))).code(),
            "embedding_error"
        );
        assert_eq!(
            IndexerError::from(VectorStoreError::CapacityExceeded {
                capacity: 1,
                current: 1,
                requested: 1
            })
            .code(),
            "capacity_exceeded"
        );
    }
}
