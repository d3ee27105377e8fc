use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of a chunk: `(document_id, chunk_index)`.
///
/// Rendered as `"{document_id}_chunk_{chunk_index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document_id: String,
    pub chunk_index: usize,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_chunk_{}", self.document_id, self.chunk_index)
    }
}

/// Structured chunk metadata, parsed once at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Free-form fields carried opaquely; never used for filtering.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A stored chunk vector with everything needed to answer a query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: ChunkId,
    /// Unit-length embedding
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub content: String,
    pub sentence_count: usize,
    pub inserted_at_unix_ms: u64,
}

/// Search candidate returned by the store, scored by raw inner product.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: ChunkId,
    pub score: f32,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// One step of an atomic store write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    DeleteDocument(String),
    Upsert(VectorRecord),
}

/// Ordered list of write operations applied under a single exclusive lock.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete_document(&mut self, document_id: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::DeleteDocument(document_id.into()));
        self
    }

    pub fn upsert(&mut self, record: VectorRecord) -> &mut Self {
        self.ops.push(WriteOp::Upsert(record));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// What an applied batch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// False when the guard rejected the batch; nothing was written.
    pub applied: bool,
    pub deleted: usize,
    pub upserted: usize,
}

pub fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
