//! # Semindex Vector Store
//!
//! Embedding generation and persistent vector storage for chunked medical
//! documents.
//!
//! ## Features
//!
//! - **Pluggable embeddings** behind [`EmbeddingBackend`] (feature hashing by
//!   default, sentence-transformer ONNX models with the `onnx` feature)
//! - **Bounded worker pool** for batched inference with per-item failure
//!   isolation
//! - **Atomic batches**: document replacement is applied under one write lock
//! - **Metadata filtering** on document type, patient, document id and date
//! - **Checksummed persistence** with crash-safe writes
//!
//! ## Architecture
//!
//! ```text
//! chunk texts
//!     │
//!     ├──> EmbeddingModel (Semaphore + spawn_blocking)
//!     │      └─> unit vectors [D], failures reported per input
//!     │
//!     ├──> VectorStore (RwLock)
//!     │      ├─> dense f32 matrix + side table
//!     │      └─> VectorIndex (brute force inner product)
//!     │
//!     └──> Persistence
//!            ├─> index.semidx (header + SHA-256 + body)
//!            └─> corpus.json (source chunks for rebuilds)
//! ```
//!
//! ## Example
//!
//! ```
//! use semindex_vector_store::{
//!     ChunkId, ChunkMetadata, MetadataFilter, StoreConfig, VectorRecord, VectorStore,
//! };
//!
//! let store = VectorStore::new(3, &StoreConfig::default());
//! store
//!     .upsert(VectorRecord {
//!         id: ChunkId::new("doc-1", 0),
//!         vector: vec![1.0, 0.0, 0.0],
//!         metadata: ChunkMetadata::default(),
//!         content: "Patient has hypertension.".to_string(),
//!         sentence_count: 1,
//!         inserted_at_unix_ms: 0,
//!     })
//!     .unwrap();
//!
//! let hits = store
//!     .search(&[1.0, 0.0, 0.0], &MetadataFilter::default(), 5)
//!     .unwrap();
//! assert_eq!(hits[0].id.to_string(), "doc-1_chunk_0");
//! ```

mod config;
mod corpus;
mod embeddings;
mod error;
mod filter;
mod index;
#[cfg(feature = "onnx")]
mod onnx;
mod persist;
mod store;
mod types;

pub use config::{
    EmbeddingBackendKind, EmbeddingConfig, IndexKind, StoreConfig, DEFAULT_DIMENSION,
    DEFAULT_MODEL_ID,
};
pub use corpus::{ChunkCorpus, CorpusChunk, CHUNK_CORPUS_SCHEMA_VERSION};
pub use embeddings::{
    normalize, validate_vector, EmbeddedBatch, EmbeddingBackend, EmbeddingFailure,
    EmbeddingModel, HashingBackend, ModelInfo,
};
pub use error::{Result, VectorStoreError};
pub use filter::{DateRange, MetadataFilter};
pub use index::{BruteForceIndex, VectorIndex};
pub use persist::{write_atomic, INDEX_FORMAT_VERSION, INDEX_MAGIC};
pub use store::{SaveReport, VectorStore};
pub use types::{
    current_unix_ms, ApplyOutcome, ChunkId, ChunkMetadata, ScoredRecord, VectorRecord, WriteBatch,
    WriteOp,
};
