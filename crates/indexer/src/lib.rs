//! # Semindex Indexer
//!
//! Document indexing orchestration: validation, chunking, batched embedding
//! with rollback, per-document state and background persistence.
//!
//! ## Pipeline
//!
//! ```text
//! IndexRequest
//!     │
//!     ├──> Validation (ids, chunk indices, ISO dates)
//!     │      └─> raw text goes through the Chunker
//!     │
//!     ├──> EmbeddingModel (batch by batch, cancellable)
//!     │      └─> failure rate > max_failure_rate ⇒ rollback
//!     │
//!     ├──> VectorStore (one atomic batch per document)
//!     │
//!     └──> Persistence (index file + chunk corpus, on change)
//! ```
//!
//! Document state: `PENDING → INDEXING → COMPLETE | FAILED`.
//!
//! ## Example
//!
//! ```no_run
//! use semindex_indexer::{EngineConfig, IndexOrchestrator};
//! use semindex_protocol::IndexRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = IndexOrchestrator::open(EngineConfig::load(None)?).await?;
//!     let response = orchestrator
//!         .index_document(IndexRequest {
//!             document_id: "doc-1".to_string(),
//!             text: Some("Patient has hypertension. Treatment: ACE inhibitor 10mg daily.".into()),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     println!("{} vectors, status {}", response.vectors_added, response.status.as_str());
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod ingest;
mod orchestrator;
mod state;

pub use config::{EngineConfig, IndexingConfig, ENV_PREFIX};
pub use error::{IndexerError, Result};
pub use orchestrator::IndexOrchestrator;
pub use state::DocumentState;
