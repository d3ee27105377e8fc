use crate::error::{Result, VectorStoreError};
use crate::persist::write_atomic;
use crate::types::ChunkMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CHUNK_CORPUS_SCHEMA_VERSION: u32 = 1;

/// Source chunk as it was submitted for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusChunk {
    pub chunk_index: usize,
    pub content: String,
    #[serde(default)]
    pub sentences: Vec<String>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Source chunks of every indexed document, kept next to the index so the
/// vectors can be regenerated after corruption or a model change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkCorpus {
    documents: BTreeMap<String, Vec<CorpusChunk>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedChunkCorpus {
    schema_version: u32,
    documents: BTreeMap<String, Vec<CorpusChunk>>,
}

impl ChunkCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedChunkCorpus = serde_json::from_slice(&bytes)
            .map_err(|e| VectorStoreError::corruption(format!("chunk corpus: {e}")))?;
        if persisted.schema_version != CHUNK_CORPUS_SCHEMA_VERSION {
            return Err(VectorStoreError::corruption(format!(
                "Unsupported chunk corpus schema_version {} (expected {CHUNK_CORPUS_SCHEMA_VERSION})",
                persisted.schema_version
            )));
        }
        Ok(Self {
            documents: persisted.documents,
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let persisted = PersistedChunkCorpus {
            schema_version: CHUNK_CORPUS_SCHEMA_VERSION,
            documents: self.documents.clone(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        write_atomic(path.as_ref(), &bytes).await
    }

    pub fn set_document_chunks(&mut self, document_id: impl Into<String>, chunks: Vec<CorpusChunk>) {
        self.documents.insert(document_id.into(), chunks);
    }

    pub fn remove_document(&mut self, document_id: &str) -> bool {
        self.documents.remove(document_id).is_some()
    }

    #[must_use]
    pub fn document_chunks(&self, document_id: &str) -> Option<&[CorpusChunk]> {
        self.documents.get(document_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub const fn documents(&self) -> &BTreeMap<String, Vec<CorpusChunk>> {
        &self.documents
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }
}
