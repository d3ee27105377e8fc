use crate::config::EngineConfig;
use crate::error::{IndexerError, Result};
use crate::ingest::prepare_chunks;
use crate::state::{DocumentRegistry, DocumentState, RunGuard};
use semindex_chunker::Chunker;
use semindex_protocol::{
    DeleteResponse, DocumentStatus, HealthResponse, IndexRequest, IndexResponse, ModelSummary,
    RebuildResponse, SearchRequest, SearchResponse, StatsResponse, StatusResponse,
};
use semindex_search::SearchEngine;
use semindex_vector_store::{
    current_unix_ms, ChunkCorpus, ChunkId, CorpusChunk, EmbeddingModel, VectorRecord,
    VectorStore, VectorStoreError, WriteBatch,
};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

const CANCELLED: &str = "cancelled";

/// Coordinates chunking, embedding and storage of documents, tracks their
/// state and keeps the on-disk index in sync with memory.
pub struct IndexOrchestrator {
    config: EngineConfig,
    chunker: Chunker,
    model: Arc<EmbeddingModel>,
    store: Arc<VectorStore>,
    search: SearchEngine,
    corpus: RwLock<ChunkCorpus>,
    corpus_generation: AtomicU64,
    documents: DocumentRegistry,
    /// Indexing and deletion hold this shared; rebuild and clear hold it
    /// exclusively.
    maintenance: RwLock<()>,
    persist_lock: tokio::sync::Mutex<()>,
    saved_store_generation: AtomicU64,
    saved_corpus_generation: AtomicU64,
    persistence: Mutex<Option<PersistenceTask>>,
}

struct PersistenceTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

enum RunOutcome {
    Complete { vectors_added: usize },
    RolledBack { reason: String },
    Cancelled,
}

impl IndexOrchestrator {
    /// Validate `config`, build the embedding model and load persisted state.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let model = EmbeddingModel::from_config(&config.embedding)?;
        Self::open_with_model(config, Arc::new(model)).await
    }

    /// Like [`IndexOrchestrator::open`] with an already constructed model.
    pub async fn open_with_model(config: EngineConfig, model: Arc<EmbeddingModel>) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunker.clone())?;
        let store = Arc::new(load_store(&config, model.dimension()).await?);
        let corpus = load_corpus(&config).await;

        let documents = DocumentRegistry::default();
        for (document_id, chunks) in corpus.documents() {
            let indexed = store.count_for_document(document_id);
            if indexed > 0 {
                documents.restore(document_id, DocumentState::restored(indexed, chunks.len()));
            }
        }

        log::info!(
            "Index orchestrator ready: {} vectors, {} documents in corpus, data dir {}",
            store.len(),
            corpus.document_count(),
            config.store.data_dir.display()
        );

        let search = SearchEngine::new(Arc::clone(&store), Arc::clone(&model), config.search.clone());
        Ok(Self {
            saved_store_generation: AtomicU64::new(store.generation()),
            config,
            chunker,
            model,
            store,
            search,
            corpus: RwLock::new(corpus),
            corpus_generation: AtomicU64::new(0),
            documents,
            maintenance: RwLock::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            saved_corpus_generation: AtomicU64::new(0),
            persistence: Mutex::new(None),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<VectorStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn model(&self) -> Arc<EmbeddingModel> {
        Arc::clone(&self.model)
    }

    #[must_use]
    pub const fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    /// Index one document, replacing whatever was indexed for it before.
    ///
    /// Embedding failures up to `indexing.max_failure_rate` are tolerated
    /// and the embedded subset is stored; above it nothing is stored and the
    /// document ends `FAILED`. Runs for the same document are serialized.
    pub async fn index_document(&self, request: IndexRequest) -> Result<IndexResponse> {
        let started = Instant::now();
        let chunks = prepare_chunks(&request, &self.chunker)?;
        let document_id = request.document_id.trim().to_string();

        let _shared = self.maintenance.read().await;
        let doc_lock = self.documents.document_lock(&document_id);
        let _serial = doc_lock.lock().await;
        self.check_capacity(&document_id, chunks.len())?;

        let run = self.documents.register_run(&document_id);
        self.documents.begin(&document_id, chunks.len());
        self.remove_from_corpus(&document_id).await;
        let outcome = self.run_indexing(&document_id, &chunks, &run).await;
        drop(run);
        self.finish_run(&document_id, chunks, outcome, started).await
    }

    fn check_capacity(&self, document_id: &str, incoming: usize) -> Result<()> {
        let current = self.store.len();
        let kept = current.saturating_sub(self.store.count_for_document(document_id));
        let capacity = self.store.max_vectors();
        if kept + incoming > capacity {
            return Err(IndexerError::Capacity(format!(
                "store holds {current} of {capacity} vectors; document {document_id} needs {incoming}"
            )));
        }
        Ok(())
    }

    async fn run_indexing(
        &self,
        document_id: &str,
        chunks: &[CorpusChunk],
        run: &RunGuard<'_>,
    ) -> Result<RunOutcome> {
        let removed = self.store.delete_by_document(document_id);
        if removed > 0 {
            log::debug!("Removed {removed} prior vectors of {document_id}");
        }
        self.documents
            .advance(document_id, DocumentStatus::Indexing, 0, None);

        let total = chunks.len();
        let wave = (self.model.batch_size() * self.model.workers()).max(1);
        let mut embedded: Vec<Option<Vec<f32>>> = vec![None; total];
        let mut failures = 0usize;

        for (wave_idx, wave_chunks) in chunks.chunks(wave).enumerate() {
            if run.is_cancelled() {
                log::info!("Indexing of {document_id} cancelled after {wave_idx} batches");
                return Ok(RunOutcome::Cancelled);
            }
            let offset = wave_idx * wave;
            let texts: Vec<String> = wave_chunks.iter().map(|c| c.content.clone()).collect();
            let batch = self.model.embed_texts(&texts).await;
            for failure in &batch.failures {
                log::warn!(
                    "Chunk {} of {document_id} failed to embed: {}",
                    wave_chunks[failure.index].chunk_index,
                    failure.reason
                );
            }
            failures += batch.failures.len();
            for (idx, vector) in batch.vectors {
                embedded[offset + idx] = Some(vector);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let failure_rate = failures as f64 / total as f64;
        let max_rate = self.config.indexing.max_failure_rate;
        if failure_rate > max_rate {
            let reason = format!(
                "{failures} of {total} chunks failed to embed ({:.1}% > {:.1}%)",
                failure_rate * 100.0,
                max_rate * 100.0
            );
            log::warn!("Rolling back {document_id}: {reason}");
            return Ok(RunOutcome::RolledBack { reason });
        }

        let inserted_at = current_unix_ms();
        let mut batch = WriteBatch::new();
        batch.delete_document(document_id);
        for (chunk, vector) in chunks.iter().zip(embedded) {
            let Some(vector) = vector else { continue };
            batch.upsert(VectorRecord {
                id: ChunkId::new(document_id, chunk.chunk_index),
                vector,
                metadata: chunk.metadata.clone(),
                content: chunk.content.clone(),
                sentence_count: chunk.sentences.len(),
                inserted_at_unix_ms: inserted_at,
            });
        }

        let applied = self.store.apply_if(batch, || !run.is_cancelled())?;
        if !applied.applied {
            log::info!("Indexing of {document_id} cancelled before commit");
            return Ok(RunOutcome::Cancelled);
        }
        if failures > 0 {
            log::warn!(
                "Indexed {document_id} with {failures} of {total} chunks missing (within {:.1}% tolerance)",
                max_rate * 100.0
            );
        }
        Ok(RunOutcome::Complete {
            vectors_added: applied.upserted,
        })
    }

    async fn finish_run(
        &self,
        document_id: &str,
        chunks: Vec<CorpusChunk>,
        outcome: Result<RunOutcome>,
        started: Instant,
    ) -> Result<IndexResponse> {
        let chunks_processed = chunks.len();
        let (status, vectors_added, error) = match outcome {
            Ok(RunOutcome::Complete { vectors_added }) => {
                self.record_in_corpus(document_id, chunks).await;
                (DocumentStatus::Complete, vectors_added, None)
            }
            Ok(RunOutcome::RolledBack { reason }) => (DocumentStatus::Failed, 0, Some(reason)),
            Ok(RunOutcome::Cancelled) => (DocumentStatus::Failed, 0, Some(CANCELLED.to_string())),
            Err(err) => {
                self.documents
                    .advance(document_id, DocumentStatus::Failed, 0, Some(err.to_string()));
                log::error!("Indexing of {document_id} failed: {err}");
                return Err(match err {
                    IndexerError::Store(VectorStoreError::CapacityExceeded { .. }) => {
                        IndexerError::Capacity(err.to_string())
                    }
                    other => other,
                });
            }
        };

        self.documents
            .advance(document_id, status, vectors_added, error.clone());
        let processing_time_ms = elapsed_ms(started);
        log::info!(
            "Indexed {document_id}: {} {vectors_added}/{chunks_processed} vectors in {processing_time_ms}ms",
            status.as_str()
        );
        Ok(IndexResponse {
            document_id: document_id.to_string(),
            chunks_processed,
            vectors_added,
            processing_time_ms,
            status,
            error,
        })
    }

    async fn record_in_corpus(&self, document_id: &str, chunks: Vec<CorpusChunk>) {
        let mut corpus = self.corpus.write().await;
        corpus.set_document_chunks(document_id, chunks);
        self.corpus_generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn remove_from_corpus(&self, document_id: &str) -> Option<usize> {
        let mut corpus = self.corpus.write().await;
        let count = corpus.document_chunks(document_id).map(<[CorpusChunk]>::len)?;
        corpus.remove_document(document_id);
        self.corpus_generation.fetch_add(1, Ordering::SeqCst);
        Some(count)
    }

    /// Remove a document, cancelling its in-flight indexing run.
    pub async fn delete_document(&self, document_id: &str) -> Result<DeleteResponse> {
        let document_id = document_id.trim();
        if document_id.is_empty() {
            return Err(IndexerError::validation("document_id must not be empty"));
        }
        if self.documents.cancel(document_id) {
            log::info!("Cancelling in-flight indexing of {document_id}");
        }

        let _shared = self.maintenance.read().await;
        let doc_lock = self.documents.document_lock(document_id);
        let serial = doc_lock.lock().await;

        let vectors_deleted = self.store.delete_by_document(document_id);
        let corpus_chunks = self.remove_from_corpus(document_id).await;
        let had_state = self.documents.remove(document_id);
        drop(serial);
        drop(doc_lock);
        self.documents.release_lock(document_id);

        if vectors_deleted == 0 && corpus_chunks.is_none() && !had_state {
            return Err(IndexerError::NotFound(document_id.to_string()));
        }
        log::info!("Deleted {document_id}: {vectors_deleted} vectors");
        Ok(DeleteResponse {
            document_id: document_id.to_string(),
            chunks_deleted: corpus_chunks.unwrap_or(vectors_deleted),
            vectors_deleted,
            status: "deleted".to_string(),
        })
    }

    /// Current state of a document. Unknown documents report `NOT_FOUND`.
    #[must_use]
    pub fn get_status(&self, document_id: &str) -> StatusResponse {
        match self.documents.get(document_id) {
            Some(state) => state.to_response(document_id),
            None => StatusResponse {
                document_id: document_id.to_string(),
                status: DocumentStatus::NotFound,
                indexed_count: 0,
                expected_count: 0,
                error: None,
                updated_at_unix_ms: None,
            },
        }
    }

    pub async fn get_stats(&self) -> StatsResponse {
        let index_size_bytes = tokio::fs::metadata(self.config.store.index_path())
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let info = self.model.model_info();
        StatsResponse {
            total_vectors: self.store.len(),
            total_documents: self.store.document_count(),
            index_size_bytes,
            avg_chunk_size: self.store.avg_content_chars(),
            dimension: self.store.dimension(),
            index_kind: self.store.index_kind().as_str().to_string(),
            index_available: self.store.is_available(),
            model: ModelSummary {
                backend: info.backend,
                model_id: info.model_id,
                dimension: info.dimension,
                batch_size: info.batch_size,
                max_sequence_length: info.max_sequence_length,
                workers: info.workers,
            },
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthResponse {
        let available = self.store.is_available();
        HealthResponse {
            status: if available { "ok" } else { "degraded" }.to_string(),
            index_available: available,
            total_vectors: self.store.len(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        Ok(self.search.search_request(request).await?)
    }

    /// Drop every vector and re-embed all documents of the chunk corpus.
    /// A store marked unavailable keeps refusing search until the last
    /// document is processed. Documents that fail stay in the corpus for the
    /// next rebuild.
    pub async fn rebuild_index(&self) -> Result<RebuildResponse> {
        let started = Instant::now();
        let _exclusive = self.maintenance.write().await;

        let sources: Vec<(String, Vec<CorpusChunk>)> = self
            .corpus
            .read()
            .await
            .documents()
            .iter()
            .map(|(id, chunks)| (id.clone(), chunks.clone()))
            .collect();
        log::info!("Rebuilding index from {} corpus documents", sources.len());

        self.store.clear();
        self.documents.clear();

        let mut response = RebuildResponse {
            documents_rebuilt: 0,
            vectors_added: 0,
            failed_documents: Vec::new(),
            processing_time_ms: 0,
        };
        for (document_id, chunks) in sources {
            let doc_started = Instant::now();
            let run = self.documents.register_run(&document_id);
            self.documents.begin(&document_id, chunks.len());
            let outcome = self.run_indexing(&document_id, &chunks, &run).await;
            drop(run);
            match self.finish_run(&document_id, chunks, outcome, doc_started).await {
                Ok(indexed) if indexed.status == DocumentStatus::Complete => {
                    response.documents_rebuilt += 1;
                    response.vectors_added += indexed.vectors_added;
                }
                Ok(_) | Err(_) => response.failed_documents.push(document_id),
            }
        }
        if !self.store.is_available() {
            log::info!("Index rebuilt; serving search again");
        }
        self.store.mark_available();
        response.processing_time_ms = elapsed_ms(started);
        log::info!(
            "Rebuild finished: {} documents, {} vectors, {} failed in {}ms",
            response.documents_rebuilt,
            response.vectors_added,
            response.failed_documents.len(),
            response.processing_time_ms
        );
        Ok(response)
    }

    /// Remove all vectors, document states, the corpus and the files on disk.
    pub async fn clear_index(&self) -> Result<()> {
        self.documents.cancel_all();
        let _exclusive = self.maintenance.write().await;
        let _persisting = self.persist_lock.lock().await;

        self.store.clear();
        self.store.mark_available();
        self.documents.clear();
        self.corpus.write().await.clear();
        for path in [self.config.store.index_path(), self.config.store.corpus_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::info!("Removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.saved_store_generation
            .store(self.store.generation(), Ordering::SeqCst);
        self.saved_corpus_generation
            .store(self.corpus_generation.load(Ordering::SeqCst), Ordering::SeqCst);
        log::info!("Index cleared");
        Ok(())
    }

    /// Save the index and the corpus if they changed since the last save.
    /// Returns whether anything was written.
    pub async fn persist(&self) -> Result<bool> {
        let _persisting = self.persist_lock.lock().await;
        if let Some(reason) = self.store.unavailable_reason() {
            log::debug!("Skipping persistence while the index is unavailable: {reason}");
            return Ok(false);
        }

        let mut wrote = false;
        if self.store.generation() != self.saved_store_generation.load(Ordering::SeqCst) {
            let path = self.config.store.index_path();
            let report = self.store.save(&path).await?;
            self.saved_store_generation
                .store(report.generation, Ordering::SeqCst);
            log::info!("Persisted {} vectors ({} bytes) to {}", report.rows, report.bytes, path.display());
            wrote = true;
        }

        let corpus = self.corpus.read().await;
        let generation = self.corpus_generation.load(Ordering::SeqCst);
        if generation != self.saved_corpus_generation.load(Ordering::SeqCst) {
            let path = self.config.store.corpus_path();
            corpus.save(&path).await?;
            self.saved_corpus_generation.store(generation, Ordering::SeqCst);
            log::debug!("Persisted chunk corpus to {}", path.display());
            wrote = true;
        }
        Ok(wrote)
    }

    /// Run [`IndexOrchestrator::persist`] every `interval` until shutdown.
    /// Failed saves are logged and retried on the next tick.
    pub fn spawn_persistence_task(self: &Arc<Self>, interval: Duration) {
        let (stop, mut stopped) = watch::channel(false);
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = orchestrator.persist().await {
                            log::error!("Background persistence failed, will retry: {err}");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Persistence task stopped");
        });

        let previous = self
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(PersistenceTask { stop, handle });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        log::info!("Persisting index every {}s", interval.as_secs_f32());
    }

    /// Stop background persistence and write a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        let task = self
            .persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(err) = task.handle.await {
                log::warn!("Persistence task ended abnormally: {err}");
            }
        }
        let wrote = self.persist().await?;
        log::info!("Shutdown complete (final save: {wrote})");
        Ok(())
    }
}

async fn load_store(config: &EngineConfig, dimension: usize) -> Result<VectorStore> {
    let path = config.store.index_path();
    match VectorStore::load(&path, dimension, &config.store).await {
        Ok(store) => Ok(store),
        Err(VectorStoreError::IoError(err)) if err.kind() == ErrorKind::NotFound => {
            log::info!("No index at {}; starting empty", path.display());
            Ok(VectorStore::new(dimension, &config.store))
        }
        Err(VectorStoreError::IndexCorruption(reason)) => {
            let store = VectorStore::new(dimension, &config.store);
            store.mark_unavailable(format!(
                "{} is corrupted ({reason}); rebuild the index",
                path.display()
            ));
            Ok(store)
        }
        Err(err) => Err(err.into()),
    }
}

async fn load_corpus(config: &EngineConfig) -> ChunkCorpus {
    let path = config.store.corpus_path();
    match ChunkCorpus::load(&path).await {
        Ok(corpus) => corpus,
        Err(VectorStoreError::IoError(err)) if err.kind() == ErrorKind::NotFound => ChunkCorpus::new(),
        Err(err) => {
            log::warn!(
                "Failed to load chunk corpus {}: {err}; starting with an empty corpus",
                path.display()
            );
            ChunkCorpus::new()
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
