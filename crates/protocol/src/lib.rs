use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod filters;

pub use filters::{DateRangeInput, SearchFilters};

pub const API_VERSION: u32 = 1;

/// Stable error codes carried by [`ErrorEnvelope::code`].
pub mod codes {
    pub const VALIDATION: &str = "validation_error";
    pub const INVALID_QUERY: &str = "invalid_query";
    pub const NOT_FOUND: &str = "not_found";
    pub const CAPACITY: &str = "capacity_exceeded";
    pub const INDEX_CORRUPTION: &str = "index_corruption";
    pub const EMBEDDING: &str = "embedding_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Indexing,
    Complete,
    Failed,
    NotFound,
}

impl DocumentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Indexing => "INDEXING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::NotFound => "NOT_FOUND",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Chunk metadata as it travels over the wire. Unknown keys are kept in
/// `extra` and returned untouched with search results.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MetadataFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    /// ISO `YYYY-MM-DD`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChunkInput {
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub sentences: Vec<String>,
    #[serde(default)]
    pub metadata: MetadataFields,
}

/// Indexing request. Either pre-segmented `chunks` or raw `text` (chunked
/// server-side); `metadata` is the document-level default merged under each
/// chunk's own metadata.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct IndexRequest {
    pub document_id: String,
    #[serde(default)]
    pub chunks: Vec<ChunkInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataFields>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IndexResponse {
    pub document_id: String,
    pub chunks_processed: usize,
    pub vectors_added: usize,
    pub processing_time_ms: u64,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchResultItem {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub score: f32,
    pub content: String,
    pub metadata: MetadataFields,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub total_results: usize,
    pub execution_time_ms: u64,
    pub filters_applied: SearchFilters,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub document_id: String,
    pub status: DocumentStatus,
    pub indexed_count: usize,
    pub expected_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_unix_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub backend: String,
    pub model_id: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_sequence_length: usize,
    pub workers: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatsResponse {
    pub total_vectors: usize,
    pub total_documents: usize,
    pub index_size_bytes: u64,
    pub avg_chunk_size: f64,
    pub dimension: usize,
    pub index_kind: String,
    pub index_available: bool,
    pub model: ModelSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeleteResponse {
    pub document_id: String,
    pub chunks_deleted: usize,
    pub vectors_deleted: usize,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RebuildResponse {
    pub documents_rebuilt: usize,
    pub vectors_added: usize,
    #[serde(default)]
    pub failed_documents: Vec<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub index_available: bool,
    pub total_vectors: usize,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn status_uses_screaming_snake_case() {
        let raw = serialize_json(&DocumentStatus::NotFound).unwrap();
        assert_eq!(raw, "\"NOT_FOUND\"");
        assert_eq!(DocumentStatus::Complete.as_str(), "COMPLETE");
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Indexing.is_terminal());
    }

    #[test]
    fn index_request_accepts_minimal_chunks() {
        let request: IndexRequest = serde_json::from_value(json!({
            "document_id": "doc-1",
            "chunks": [
                {"chunk_index": 0, "content": "Patient has hypertension."},
                {
                    "chunk_index": 1,
                    "content": "Treatment: ACE inhibitor 10mg daily.",
                    "metadata": {"document_type": "prescription", "ward": "cardio"}
                }
            ]
        }))
        .unwrap();

        assert_eq!(request.chunks.len(), 2);
        assert!(request.text.is_none());
        assert!(request.chunks[0].sentences.is_empty());
        let meta = &request.chunks[1].metadata;
        assert_eq!(meta.document_type.as_deref(), Some("prescription"));
        assert_eq!(meta.extra.get("ward"), Some(&json!("cardio")));
    }

    #[test]
    fn metadata_extra_is_flattened_back() {
        let mut meta = MetadataFields {
            patient_id: Some("P-001".to_string()),
            ..Default::default()
        };
        meta.extra.insert("source".to_string(), json!("scan"));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({"patient_id": "P-001", "source": "scan"}));
    }

    #[test]
    fn error_envelope_omits_missing_hint() {
        let plain = serde_json::to_value(ErrorEnvelope::new(codes::NOT_FOUND, "gone")).unwrap();
        assert_eq!(plain, json!({"code": "not_found", "message": "gone"}));

        let hinted = ErrorEnvelope::new(codes::INDEX_CORRUPTION, "checksum mismatch")
            .with_hint("POST /admin/rebuild");
        assert_eq!(hinted.hint.as_deref(), Some("POST /admin/rebuild"));
    }
}
