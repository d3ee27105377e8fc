use crate::config::{IndexKind, StoreConfig};
use crate::embeddings::validate_vector;
use crate::error::{Result, VectorStoreError};
use crate::filter::MetadataFilter;
use crate::index::{build_index, VectorIndex};
use crate::persist;
use crate::types::{
    ApplyOutcome, ChunkId, ChunkMetadata, ScoredRecord, VectorRecord, WriteBatch, WriteOp,
};
use ndarray::{ArrayView1, ArrayView2};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-row side data, parallel to the vector matrix.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordMeta {
    pub id: ChunkId,
    pub metadata: ChunkMetadata,
    pub content: String,
    pub sentence_count: usize,
    pub inserted_at_unix_ms: u64,
}

/// Dense row-major vectors plus lookup tables.
pub(crate) struct IndexData {
    pub dimension: usize,
    pub vectors: Vec<f32>,
    pub meta: Vec<RecordMeta>,
    by_chunk: HashMap<ChunkId, usize>,
    by_document: HashMap<String, BTreeSet<usize>>,
}

impl IndexData {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            meta: Vec::new(),
            by_chunk: HashMap::new(),
            by_document: HashMap::new(),
        }
    }

    pub(crate) fn from_rows(
        dimension: usize,
        vectors: Vec<f32>,
        meta: Vec<RecordMeta>,
    ) -> Result<Self> {
        if vectors.len() != meta.len() * dimension {
            return Err(VectorStoreError::corruption(format!(
                "{} vector values for {} rows of dimension {dimension}",
                vectors.len(),
                meta.len()
            )));
        }
        let mut data = Self {
            dimension,
            vectors,
            meta,
            by_chunk: HashMap::new(),
            by_document: HashMap::new(),
        };
        for (row, record) in data.meta.iter().enumerate() {
            if data.by_chunk.insert(record.id.clone(), row).is_some() {
                return Err(VectorStoreError::corruption(format!(
                    "duplicate chunk id {}",
                    record.id
                )));
            }
            data.by_document
                .entry(record.id.document_id.clone())
                .or_default()
                .insert(row);
        }
        Ok(data)
    }

    fn len(&self) -> usize {
        self.meta.len()
    }

    fn matrix(&self) -> Result<ArrayView2<'_, f32>> {
        ArrayView2::from_shape((self.len(), self.dimension), &self.vectors)
            .map_err(|e| VectorStoreError::corruption(format!("vector matrix shape: {e}")))
    }

    fn row(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dimension..(row + 1) * self.dimension]
    }

    fn upsert(&mut self, record: VectorRecord) {
        let meta = RecordMeta {
            id: record.id,
            metadata: record.metadata,
            content: record.content,
            sentence_count: record.sentence_count,
            inserted_at_unix_ms: record.inserted_at_unix_ms,
        };
        if let Some(&row) = self.by_chunk.get(&meta.id) {
            let dim = self.dimension;
            self.vectors[row * dim..(row + 1) * dim].copy_from_slice(&record.vector);
            self.meta[row] = meta;
            return;
        }
        let row = self.len();
        self.vectors.extend_from_slice(&record.vector);
        self.by_chunk.insert(meta.id.clone(), row);
        self.by_document
            .entry(meta.id.document_id.clone())
            .or_default()
            .insert(row);
        self.meta.push(meta);
    }

    fn delete_document(&mut self, document_id: &str) -> usize {
        let Some(rows) = self.by_document.remove(document_id) else {
            return 0;
        };
        // Highest rows first: the row swapped into a freed slot then never
        // belongs to this document.
        for &row in rows.iter().rev() {
            self.swap_remove(row);
        }
        rows.len()
    }

    fn swap_remove(&mut self, row: usize) {
        let dim = self.dimension;
        let last = self.len() - 1;
        let removed = self.meta.swap_remove(row);
        self.by_chunk.remove(&removed.id);
        if row != last {
            self.vectors
                .copy_within(last * dim..(last + 1) * dim, row * dim);
            let moved = &self.meta[row];
            self.by_chunk.insert(moved.id.clone(), row);
            if let Some(rows) = self.by_document.get_mut(&moved.id.document_id) {
                rows.remove(&last);
                rows.insert(row);
            }
        }
        self.vectors.truncate(last * dim);
    }

    fn clear(&mut self) {
        self.vectors.clear();
        self.meta.clear();
        self.by_chunk.clear();
        self.by_document.clear();
    }

    /// Row count after applying `ops`, without applying them.
    fn projected_len(&self, ops: &[WriteOp]) -> usize {
        let mut removed_docs: HashSet<&str> = HashSet::new();
        let mut removed_rows = 0usize;
        let mut added: HashSet<&ChunkId> = HashSet::new();
        for op in ops {
            match op {
                WriteOp::DeleteDocument(doc) => {
                    if removed_docs.insert(doc.as_str()) {
                        removed_rows += self.by_document.get(doc).map_or(0, BTreeSet::len);
                    }
                }
                WriteOp::Upsert(record) => {
                    let exists = self.by_chunk.contains_key(&record.id)
                        && !removed_docs.contains(record.id.document_id.as_str());
                    if !exists {
                        added.insert(&record.id);
                    }
                }
            }
        }
        self.len() - removed_rows + added.len()
    }
}

struct StoreState {
    data: IndexData,
    index: Box<dyn VectorIndex>,
}

/// In-memory vector store: one writer at a time, many concurrent readers.
pub struct VectorStore {
    state: RwLock<StoreState>,
    max_vectors: usize,
    overfetch_factor: usize,
    generation: AtomicU64,
    unavailable: RwLock<Option<String>>,
}

/// Result of a successful [`VectorStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub bytes: u64,
    pub rows: usize,
    /// Store generation captured with the snapshot
    pub generation: u64,
}

impl VectorStore {
    #[must_use]
    pub fn new(dimension: usize, config: &StoreConfig) -> Self {
        Self::from_data(IndexData::new(dimension), config)
    }

    /// Empty store scored by `index` instead of the kind named in `config`.
    #[must_use]
    pub fn with_index(dimension: usize, config: &StoreConfig, index: Box<dyn VectorIndex>) -> Self {
        Self::assemble(IndexData::new(dimension), config, index)
    }

    fn from_data(data: IndexData, config: &StoreConfig) -> Self {
        Self::assemble(data, config, build_index(config.index_kind))
    }

    fn assemble(data: IndexData, config: &StoreConfig, mut index: Box<dyn VectorIndex>) -> Self {
        if let Ok(matrix) = data.matrix() {
            index.refresh(matrix);
        }
        Self {
            state: RwLock::new(StoreState { data, index }),
            max_vectors: config.max_vectors,
            overfetch_factor: config.overfetch_factor.max(1),
            generation: AtomicU64::new(0),
            unavailable: RwLock::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.read().data.dimension
    }

    #[must_use]
    pub fn index_kind(&self) -> IndexKind {
        self.read().index.kind()
    }

    #[must_use]
    pub const fn max_vectors(&self) -> usize {
        self.max_vectors
    }

    /// Insert or replace one record.
    pub fn upsert(&self, record: VectorRecord) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.upsert(record);
        self.apply(batch).map(|_| ())
    }

    /// Apply a batch atomically.
    pub fn apply(&self, batch: WriteBatch) -> Result<ApplyOutcome> {
        self.apply_if(batch, || true)
    }

    /// Apply a batch atomically if `guard` holds. The guard runs while the
    /// exclusive lock is held, so a concurrent canceller either sees the
    /// batch fully applied or prevents it entirely.
    pub fn apply_if(&self, batch: WriteBatch, guard: impl FnOnce() -> bool) -> Result<ApplyOutcome> {
        let dimension = self.dimension();
        let mut ops = batch.into_ops();
        for op in &mut ops {
            if let WriteOp::Upsert(record) = op {
                let vector = std::mem::take(&mut record.vector);
                record.vector = validate_vector(vector, dimension)?;
            }
        }

        let mut state = self.write();
        if !guard() {
            return Ok(ApplyOutcome::default());
        }

        let projected = state.data.projected_len(&ops);
        if projected > self.max_vectors && projected > state.data.len() {
            return Err(VectorStoreError::CapacityExceeded {
                capacity: self.max_vectors,
                current: state.data.len(),
                requested: projected - state.data.len(),
            });
        }

        let mut outcome = ApplyOutcome {
            applied: true,
            ..ApplyOutcome::default()
        };
        for op in ops {
            match op {
                WriteOp::DeleteDocument(doc) => outcome.deleted += state.data.delete_document(&doc),
                WriteOp::Upsert(record) => {
                    state.data.upsert(record);
                    outcome.upserted += 1;
                }
            }
        }

        let StoreState { data, index } = &mut *state;
        index.refresh(data.matrix()?);
        drop(state);

        if outcome.deleted > 0 || outcome.upserted > 0 {
            self.bump_generation();
        }
        Ok(outcome)
    }

    /// Remove every vector of a document; returns how many were removed.
    pub fn delete_by_document(&self, document_id: &str) -> usize {
        let mut state = self.write();
        let removed = state.data.delete_document(document_id);
        if removed > 0 {
            let StoreState { data, index } = &mut *state;
            if let Ok(matrix) = data.matrix() {
                index.refresh(matrix);
            }
            drop(state);
            self.bump_generation();
        }
        removed
    }

    /// Candidates matching `filter`, scored by raw inner product. Ranking
    /// uses the similarity clamped to `[0, 1]`, so all non-positive scores
    /// tie and are ordered by ascending `chunk_index`, then `document_id`.
    pub fn search(
        &self,
        query: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if let Some(reason) = self.unavailable_reason() {
            return Err(VectorStoreError::IndexCorruption(reason));
        }

        let state = self.read();
        let data = &state.data;
        if query.len() != data.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: data.dimension,
                actual: query.len(),
            });
        }
        if data.len() == 0 || top_k == 0 {
            return Ok(Vec::new());
        }

        let matrix = data.matrix()?;
        let query = ArrayView1::from(query);
        let matches = |row: usize| {
            let meta = &data.meta[row];
            filter.matches(&meta.id.document_id, &meta.metadata)
        };

        let mut candidates = if state.index.post_filter() {
            let limit = top_k.saturating_mul(self.overfetch_factor);
            let mut scored = state.index.search(matrix, query, &|_| true, limit);
            scored.retain(|(row, _)| matches(*row));
            scored
        } else if filter.is_empty() {
            state.index.search(matrix, query, &|_| true, top_k)
        } else {
            state.index.search(matrix, query, &matches, top_k)
        };

        candidates.sort_by(|a, b| compare_ranked(data, *a, *b));
        candidates.truncate(top_k);

        Ok(candidates
            .into_iter()
            .map(|(row, score)| {
                let meta = &data.meta[row];
                ScoredRecord {
                    id: meta.id.clone(),
                    score,
                    content: meta.content.clone(),
                    metadata: meta.metadata.clone(),
                }
            })
            .collect())
    }

    #[must_use]
    pub fn get(&self, id: &ChunkId) -> Option<VectorRecord> {
        let state = self.read();
        let row = *state.data.by_chunk.get(id)?;
        let meta = &state.data.meta[row];
        Some(VectorRecord {
            id: meta.id.clone(),
            vector: state.data.row(row).to_vec(),
            metadata: meta.metadata.clone(),
            content: meta.content.clone(),
            sentence_count: meta.sentence_count,
            inserted_at_unix_ms: meta.inserted_at_unix_ms,
        })
    }

    #[must_use]
    pub fn contains(&self, id: &ChunkId) -> bool {
        self.read().data.by_chunk.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.read().data.by_document.len()
    }

    #[must_use]
    pub fn count_for_document(&self, document_id: &str) -> usize {
        self.read()
            .data
            .by_document
            .get(document_id)
            .map_or(0, BTreeSet::len)
    }

    /// Chunk ids of a document, ordered by chunk index.
    #[must_use]
    pub fn chunk_ids_for_document(&self, document_id: &str) -> Vec<ChunkId> {
        let state = self.read();
        let mut ids: Vec<ChunkId> = state
            .data
            .by_document
            .get(document_id)
            .map(|rows| rows.iter().map(|&row| state.data.meta[row].id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Mean chunk content length in characters.
    #[must_use]
    pub fn avg_content_chars(&self) -> f64 {
        let state = self.read();
        if state.data.meta.is_empty() {
            return 0.0;
        }
        let total: usize = state
            .data
            .meta
            .iter()
            .map(|m| m.content.chars().count())
            .sum();
        total as f64 / state.data.meta.len() as f64
    }

    /// Monotonic write counter; changes whenever stored data changes.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::SeqCst)
    }

    /// Drop every vector. Availability is left as is; callers restore it
    /// with [`VectorStore::mark_available`] once the store is repopulated.
    pub fn clear(&self) {
        let mut state = self.write();
        state.data.clear();
        let StoreState { data, index } = &mut *state;
        if let Ok(matrix) = data.matrix() {
            index.refresh(matrix);
        }
        drop(state);
        self.bump_generation();
    }

    pub fn mark_unavailable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("Vector store marked unavailable: {reason}");
        *self
            .unavailable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    pub fn mark_available(&self) {
        *self
            .unavailable
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn unavailable_reason(&self) -> Option<String> {
        self.unavailable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.unavailable_reason().is_none()
    }

    /// Persist a consistent snapshot to `path` (tmp file, fsync, rename).
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<SaveReport> {
        let path = path.as_ref();
        let (bytes, rows, generation) = {
            let state = self.read();
            let bytes = persist::encode(state.data.dimension, &state.data.vectors, &state.data.meta)?;
            (bytes, state.data.len(), self.generation())
        };
        persist::write_atomic(path, &bytes).await?;
        log::debug!("Saved {rows} vectors ({} bytes) to {}", bytes.len(), path.display());
        Ok(SaveReport {
            bytes: bytes.len() as u64,
            rows,
            generation,
        })
    }

    /// Load a store saved by [`VectorStore::save`]. Checksum, header or
    /// dimension mismatches yield [`VectorStoreError::IndexCorruption`].
    pub async fn load(path: impl AsRef<Path>, dimension: usize, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let decoded = persist::decode(&bytes)?;
        if decoded.dimension != dimension {
            return Err(VectorStoreError::corruption(format!(
                "index dimension {} does not match configured dimension {dimension}",
                decoded.dimension
            )));
        }
        let data = IndexData::from_rows(decoded.dimension, decoded.vectors, decoded.meta)?;
        log::info!("Loaded {} vectors from {}", data.len(), path.display());
        Ok(Self::from_data(data, config))
    }
}

fn compare_ranked(data: &IndexData, a: (usize, f32), b: (usize, f32)) -> Ordering {
    let (ma, mb) = (&data.meta[a.0], &data.meta[b.0]);
    b.1.clamp(0.0, 1.0)
        .total_cmp(&a.1.clamp(0.0, 1.0))
        .then_with(|| ma.id.chunk_index.cmp(&mb.id.chunk_index))
        .then_with(|| ma.id.document_id.cmp(&mb.id.document_id))
}
