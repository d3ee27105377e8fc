//! # Semindex Chunker
//!
//! Sentence-aware, overlapping text chunking for semantic indexing of
//! de-identified medical documents.
//!
//! ## Pipeline
//!
//! ```text
//! Document text
//!     │
//!     ├──> Normalization (collapse whitespace, strip page breaks)
//!     │
//!     ├──> Sentence segmentation (Unicode sentence boundaries)
//!     │      └─> oversized sentences hard-split at chunk_size
//!     │
//!     └──> Greedy packing
//!            ├─> fill chunk up to chunk_size characters
//!            ├─> step back at most `overlap` characters for the next chunk
//!            └─> emit TextChunk[] with character offsets
//! ```
//!
//! Offsets are measured in characters (Unicode scalar values) of the
//! normalized text. Chunks always cover the whole normalized text without
//! gaps, and adjacent chunks share at most `overlap` characters.
//!
//! ## Example
//!
//! ```rust
//! use semindex_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig {
//!     chunk_size: 64,
//!     overlap: 16,
//!     min_chunk_chars: 0,
//! })
//! .unwrap();
//!
//! let text = "Patient admitted for chest pain. ECG normal. Troponin negative. \
//!             Discharged with aspirin and follow-up in two weeks.";
//! let chunks = chunker.chunk_text(text);
//! assert!(chunks.len() > 1);
//! assert_eq!(chunks[0].start, 0);
//! ```

mod chunker;
mod config;
mod error;
mod sentence;
mod types;

pub use chunker::Chunker;
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use types::{ChunkEstimate, TextChunk};
