use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] semindex_vector_store::VectorStoreError),
}

impl SearchError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidQuery(reason.into())
    }
}
