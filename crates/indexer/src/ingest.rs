use crate::error::{IndexerError, Result};
use semindex_chunker::Chunker;
use semindex_protocol::{IndexRequest, MetadataFields};
use semindex_search::parse_iso_date;
use semindex_vector_store::{ChunkMetadata, CorpusChunk};
use std::collections::HashSet;

/// Validate an index request and turn it into the chunks to embed.
///
/// Pre-segmented `chunks` are taken as given; raw `text` is normalized and
/// chunked. Document-level metadata fills fields a chunk leaves unset.
pub(crate) fn prepare_chunks(request: &IndexRequest, chunker: &Chunker) -> Result<Vec<CorpusChunk>> {
    if request.document_id.trim().is_empty() {
        return Err(IndexerError::validation("document_id must not be empty"));
    }
    let defaults = request
        .metadata
        .as_ref()
        .map(|m| metadata_from_wire(m, "metadata"))
        .transpose()?
        .unwrap_or_default();

    match (request.chunks.is_empty(), request.text.as_deref()) {
        (false, Some(_)) => Err(IndexerError::validation(
            "provide either chunks or text, not both",
        )),
        (false, None) => chunks_from_input(request, &defaults),
        (true, Some(text)) => chunks_from_text(text, chunker, &defaults),
        (true, None) => Err(IndexerError::validation(
            "request must carry a non-empty chunks list or text",
        )),
    }
}

fn chunks_from_input(request: &IndexRequest, defaults: &ChunkMetadata) -> Result<Vec<CorpusChunk>> {
    let mut seen = HashSet::with_capacity(request.chunks.len());
    let mut chunks = Vec::with_capacity(request.chunks.len());
    for input in &request.chunks {
        if !seen.insert(input.chunk_index) {
            return Err(IndexerError::validation(format!(
                "duplicate chunk_index {}",
                input.chunk_index
            )));
        }
        if input.content.trim().is_empty() {
            return Err(IndexerError::validation(format!(
                "chunk {} has empty content",
                input.chunk_index
            )));
        }
        let field = format!("chunks[{}].metadata", input.chunk_index);
        let metadata = merge(metadata_from_wire(&input.metadata, &field)?, defaults);
        chunks.push(CorpusChunk {
            chunk_index: input.chunk_index,
            content: input.content.clone(),
            sentences: input.sentences.clone(),
            metadata,
        });
    }
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
}

fn chunks_from_text(text: &str, chunker: &Chunker, defaults: &ChunkMetadata) -> Result<Vec<CorpusChunk>> {
    let chunks = chunker.chunk_text(text);
    if chunks.is_empty() {
        return Err(IndexerError::validation(format!(
            "text is shorter than the minimum of {} characters",
            chunker.config().min_chunk_chars
        )));
    }
    Ok(chunks
        .into_iter()
        .map(|chunk| CorpusChunk {
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            sentences: chunk.sentences,
            metadata: defaults.clone(),
        })
        .collect())
}

/// Parse wire metadata once; dates become calendar dates.
pub(crate) fn metadata_from_wire(fields: &MetadataFields, field: &str) -> Result<ChunkMetadata> {
    let document_date = fields
        .document_date
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_iso_date(&format!("{field}.document_date"), raw))
        .transpose()
        .map_err(IndexerError::Validation)?;
    Ok(ChunkMetadata {
        document_type: non_blank(fields.document_type.as_deref()),
        patient_id: non_blank(fields.patient_id.as_deref()),
        document_date,
        page: fields.page,
        section: non_blank(fields.section.as_deref()),
        extra: fields.extra.clone(),
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn merge(mut chunk: ChunkMetadata, defaults: &ChunkMetadata) -> ChunkMetadata {
    chunk.document_type = chunk.document_type.or_else(|| defaults.document_type.clone());
    chunk.patient_id = chunk.patient_id.or_else(|| defaults.patient_id.clone());
    chunk.document_date = chunk.document_date.or(defaults.document_date);
    chunk.page = chunk.page.or(defaults.page);
    chunk.section = chunk.section.or_else(|| defaults.section.clone());
    for (key, value) in &defaults.extra {
        chunk.extra.entry(key.clone()).or_insert_with(|| value.clone());
    }
    chunk
}
