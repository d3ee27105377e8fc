use crate::config::ChunkerConfig;
use crate::error::{ChunkerError, Result};
use crate::sentence::{sentence_spans, split_oversized, Span};
use crate::types::{ChunkEstimate, TextChunk};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Main chunker interface for processing document text
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

/// Packed chunk boundaries before text is materialized.
struct Window {
    start: usize,
    end: usize,
    units: Range<usize>,
}

impl Chunker {
    /// Create a new chunker with configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate().map_err(ChunkerError::invalid_config)?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Collapse line breaks, page breaks and whitespace runs into single
    /// spaces and trim the ends. Chunk offsets refer to this form.
    #[must_use]
    pub fn normalize(text: &str) -> String {
        WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
    }

    /// Chunk raw document text. Returns an empty list when the normalized
    /// text is shorter than `min_chunk_chars`.
    #[must_use]
    pub fn chunk_text(&self, text: &str) -> Vec<TextChunk> {
        let normalized = Self::normalize(text);
        let total = normalized.chars().count();
        if total == 0 || total < self.config.min_chunk_chars {
            log::debug!(
                "Text below minimum chunk length ({total} < {}), no chunks",
                self.config.min_chunk_chars
            );
            return Vec::new();
        }
        self.chunk_normalized(&normalized)
    }

    /// Chunk text that is already normalized, failing on empty input.
    pub fn chunk_str(&self, normalized: &str) -> Result<Vec<TextChunk>> {
        if normalized.is_empty() {
            return Err(ChunkerError::EmptyContent);
        }
        Ok(self.chunk_normalized(normalized))
    }

    fn chunk_normalized(&self, text: &str) -> Vec<TextChunk> {
        let units = split_oversized(sentence_spans(text), self.config.chunk_size);
        if units.is_empty() {
            return Vec::new();
        }

        // Character offset -> byte offset, with a trailing entry for text.len().
        let byte_at: Vec<usize> = text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(text.len()))
            .collect();
        let slice = |span: Span| &text[byte_at[span.start]..byte_at[span.end]];

        let chunks: Vec<TextChunk> = self
            .pack(&units)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, window)| TextChunk {
                chunk_index,
                start: window.start,
                end: window.end,
                content: slice(Span {
                    start: window.start,
                    end: window.end,
                })
                .to_string(),
                sentences: units[window.units]
                    .iter()
                    .map(|unit| slice(*unit).trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            })
            .collect();

        log::debug!(
            "Text chunked: {} characters, {} units, {} chunks",
            byte_at.len() - 1,
            units.len(),
            chunks.len()
        );
        chunks
    }

    /// Greedy packing over units that tile `[0, L)` and are each at most
    /// `chunk_size` long.
    ///
    /// The next chunk starts at the earliest unit start that is
    /// - strictly after the current chunk start,
    /// - within `overlap` characters of the current chunk end,
    /// - not before the end of the chunk preceding the current one,
    /// - close enough that the next unit still fits,
    ///
    /// falling back to the current end (no overlap).
    fn pack(&self, units: &[Span]) -> Vec<Window> {
        let size = self.config.chunk_size;
        let overlap = self.config.overlap;

        let mut windows = Vec::new();
        let mut first = 0usize;
        let mut next = 0usize;
        let mut floor = 0usize;

        loop {
            let start = units[first].start;
            while next < units.len() && units[next].end - start <= size {
                next += 1;
            }
            let end = units[next - 1].end;
            windows.push(Window {
                start,
                end,
                units: first..next,
            });

            if next == units.len() {
                break;
            }

            let upcoming = units[next];
            let restart = ((first + 1)..next)
                .find(|&k| {
                    let s = units[k].start;
                    s >= floor && end - s <= overlap && upcoming.end - s <= size
                })
                .unwrap_or(next);

            floor = end;
            first = restart;
        }

        windows
    }

    /// Forecast the number of chunks for a text without chunking it.
    #[must_use]
    pub fn estimate_chunks(&self, text: &str) -> ChunkEstimate {
        let total_characters = text.chars().count();
        let estimated_chunks = if total_characters == 0 {
            0
        } else {
            let per_chunk = self.config.chunk_size - self.config.overlap / 2;
            (total_characters / per_chunk.max(1)).max(1)
        };
        ChunkEstimate {
            estimated_chunks,
            total_characters,
            chunk_size: self.config.chunk_size,
            overlap: self.config.overlap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            overlap,
            min_chunk_chars: 0,
        })
        .unwrap()
    }

    fn assert_tiling(chunks: &[TextChunk], total: usize, overlap: usize) {
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, total);
        for (i, pair) in chunks.windows(2).enumerate() {
            assert!(pair[1].start <= pair[0].end, "gap after chunk {i}");
            assert!(pair[1].start > pair[0].start, "chunk {} does not advance", i + 1);
            assert!(pair[0].overlap_with(&pair[1]) <= overlap);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn normalize_collapses_whitespace_and_breaks() {
        let raw = "  Compte rendu\r\n\r\nopératoire\x0cpage 2\t\tfin  ";
        assert_eq!(Chunker::normalize(raw), "Compte rendu opératoire page 2 fin");
    }

    #[test]
    fn short_text_is_single_chunk() {
        let c = chunker(512, 50);
        let chunks = c.chunk_text("Patient has hypertension. Treatment: ACE inhibitor 10mg daily.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sentences.len(), 2);
        assert_eq!(chunks[0].sentences[0], "Patient has hypertension.");
    }

    #[test]
    fn text_below_minimum_produces_no_chunks() {
        let c = Chunker::new(ChunkerConfig::default()).unwrap();
        assert!(c.chunk_text("Too short.").is_empty());
        assert!(c.chunk_text("   \n\t ").is_empty());
    }

    #[test]
    fn sentences_are_packed_with_bounded_overlap() {
        let c = chunker(60, 25);
        let text = "First sentence is here. Second sentence follows. Third one now. \
                    Fourth sentence ends. Fifth closes it.";
        let chunks = c.chunk_text(text);
        let normalized = Chunker::normalize(text);
        assert!(chunks.len() > 1);
        assert_tiling(&chunks, normalized.chars().count(), 25);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 60);
        }
        // The second chunk re-uses the last sentence of the first.
        let shared = chunks[0].overlap_with(&chunks[1]);
        assert!(shared > 0);
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let c = chunker(10, 0);
        let text = "a".repeat(35);
        let chunks = c.chunk_text(&text);
        let lens: Vec<usize> = chunks.iter().map(TextChunk::char_len).collect();
        assert_eq!(lens, vec![10, 10, 10, 5]);
        assert_tiling(&chunks, 35, 0);
    }

    #[test]
    fn content_matches_character_range() {
        let c = chunker(20, 5);
        let text = "Fièvre élevée ce matin. Évolution favorable. Sortie prévue.";
        let normalized = Chunker::normalize(text);
        let chars: Vec<char> = normalized.chars().collect();
        for chunk in c.chunk_text(text) {
            let expected: String = chars[chunk.start..chunk.end].iter().collect();
            assert_eq!(chunk.content, expected);
        }
    }

    #[test]
    fn non_adjacent_chunks_never_overlap() {
        // Short sentences with a large overlap budget: the third chunk must not
        // start inside the first one.
        let c = chunker(12, 8);
        let text = "Ab. ".repeat(8);
        let chunks = c.chunk_text(&text);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[1].start, 4);
        assert_eq!(chunks[2].start, 12);
        for i in 0..chunks.len() {
            for j in (i + 2)..chunks.len() {
                assert_eq!(chunks[i].overlap_with(&chunks[j]), 0, "chunks {i} and {j}");
            }
        }
    }

    #[test]
    fn chunk_str_rejects_empty_input() {
        let c = chunker(10, 0);
        assert_eq!(c.chunk_str(""), Err(ChunkerError::EmptyContent));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 10,
            overlap: 10,
            min_chunk_chars: 0,
        })
        .unwrap_err();
        assert!(matches!(err, ChunkerError::InvalidConfig(_)));
    }

    #[test]
    fn estimate_chunks_matches_formula() {
        let c = chunker(512, 50);
        let estimate = c.estimate_chunks(&"x".repeat(2000));
        assert_eq!(estimate.estimated_chunks, 2000 / 487);
        assert_eq!(estimate.total_characters, 2000);
        assert_eq!(c.estimate_chunks("").estimated_chunks, 0);
        assert_eq!(c.estimate_chunks("tiny").estimated_chunks, 1);
    }
}
