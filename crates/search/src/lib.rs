//! # Semindex Search
//!
//! Similarity search over the vector store with structured metadata
//! filtering, score thresholding and deterministic ordering.
//!
//! ```text
//! SearchRequest
//!     │
//!     ├──> filter validation (dates parsed, blanks rejected)
//!     ├──> query embedding (or caller-supplied vector)
//!     ├──> store scan: pre-filter + inner product
//!     └──> clamp to [0, 1] → threshold → sort → truncate
//! ```
//!
//! Ties are broken by ascending `chunk_index`, then `document_id`, so equal
//! inputs always produce the same result order.

mod config;
mod engine;
mod error;
mod filters;

pub use config::SearchConfig;
pub use engine::{
    metadata_to_wire, QueryInput, SearchEngine, SearchOutcome, SearchQuery, SearchResult,
};
pub use error::{Result, SearchError};
pub use filters::{build_filter, parse_iso_date};
