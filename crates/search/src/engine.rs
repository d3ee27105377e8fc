use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::filters::build_filter;
use semindex_protocol::{MetadataFields, SearchRequest, SearchResponse, SearchResultItem};
use semindex_vector_store::{
    validate_vector, ChunkId, ChunkMetadata, EmbeddingModel, MetadataFilter, VectorStore,
};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    Text(String),
    /// Precomputed query embedding; normalized before scoring
    Vector(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: QueryInput,
    pub filter: MetadataFilter,
    pub top_k: usize,
    pub similarity_threshold: f32,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: QueryInput::Text(query.into()),
            filter: MetadataFilter::default(),
            top_k: SearchConfig::default().default_top_k,
            similarity_threshold: 0.0,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    /// Similarity in `[0, 1]`
    pub score: f32,
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub execution_time_ms: u64,
}

/// Query pipeline: validate, embed, filter, score, threshold, sort, truncate.
pub struct SearchEngine {
    store: Arc<VectorStore>,
    model: Arc<EmbeddingModel>,
    config: SearchConfig,
}

impl SearchEngine {
    #[must_use]
    pub fn new(store: Arc<VectorStore>, model: Arc<EmbeddingModel>, config: SearchConfig) -> Self {
        Self {
            store,
            model,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Validate a wire request and fill in configured defaults.
    pub fn query_from_request(&self, request: &SearchRequest) -> Result<SearchQuery> {
        let filter = build_filter(&request.filters)?;
        Ok(SearchQuery {
            query: QueryInput::Text(request.query.clone()),
            filter,
            top_k: request.limit.unwrap_or(self.config.default_top_k),
            similarity_threshold: request.threshold.unwrap_or(self.config.default_threshold),
        })
    }

    fn validate(&self, query: &SearchQuery) -> Result<()> {
        if query.top_k == 0 || query.top_k > self.config.max_top_k {
            return Err(SearchError::invalid(format!(
                "limit must be in 1..={} (got {})",
                self.config.max_top_k, query.top_k
            )));
        }
        let threshold = query.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::invalid(format!(
                "threshold must be in [0, 1] (got {threshold})"
            )));
        }
        if let QueryInput::Text(text) = &query.query {
            if text.trim().is_empty() {
                return Err(SearchError::invalid("query must not be empty"));
            }
        }
        Ok(())
    }

    pub async fn search(&self, query: SearchQuery) -> Result<SearchOutcome> {
        let started = Instant::now();
        self.validate(&query)?;

        let vector = match query.query {
            QueryInput::Text(text) => self.model.embed_query(&text).await?,
            QueryInput::Vector(raw) => validate_vector(raw, self.store.dimension())
                .map_err(|e| SearchError::invalid(format!("query vector: {e}")))?,
        };

        let candidates = self.store.search(&vector, &query.filter, query.top_k)?;
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|c| SearchResult {
                chunk_id: c.id,
                score: c.score.clamp(0.0, 1.0),
                content: c.content,
                metadata: c.metadata,
            })
            .filter(|r| r.score >= query.similarity_threshold)
            .collect();
        // Clamping can merge distinct raw scores into ties.
        results.sort_by(compare_results);
        results.truncate(query.top_k);

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::debug!(
            "Search returned {} results in {execution_time_ms}ms (top_k {}, threshold {})",
            results.len(),
            query.top_k,
            query.similarity_threshold
        );
        Ok(SearchOutcome {
            total_results: results.len(),
            results,
            execution_time_ms,
        })
    }

    /// Serve a wire request end to end.
    pub async fn search_request(&self, request: SearchRequest) -> Result<SearchResponse> {
        let query = self.query_from_request(&request)?;
        let outcome = self.search(query).await?;
        Ok(SearchResponse {
            query: request.query,
            results: outcome.results.into_iter().map(to_wire).collect(),
            total_results: outcome.total_results,
            execution_time_ms: outcome.execution_time_ms,
            filters_applied: request.filters,
        })
    }
}

fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk_id.chunk_index.cmp(&b.chunk_id.chunk_index))
        .then_with(|| a.chunk_id.document_id.cmp(&b.chunk_id.document_id))
}

pub fn metadata_to_wire(metadata: ChunkMetadata) -> MetadataFields {
    MetadataFields {
        document_type: metadata.document_type,
        patient_id: metadata.patient_id,
        document_date: metadata
            .document_date
            .map(|d| d.format("%Y-%m-%d").to_string()),
        page: metadata.page,
        section: metadata.section,
        extra: metadata.extra,
    }
}

fn to_wire(result: SearchResult) -> SearchResultItem {
    SearchResultItem {
        chunk_id: result.chunk_id.to_string(),
        document_id: result.chunk_id.document_id,
        chunk_index: result.chunk_id.chunk_index,
        score: result.score,
        content: result.content,
        metadata: metadata_to_wire(result.metadata),
    }
}
