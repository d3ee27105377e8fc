use serde::{Deserialize, Serialize};

/// A contiguous slice of a normalized document, the unit of embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    /// Position of this chunk within the document (0-based, monotonic)
    pub chunk_index: usize,

    /// Start offset in characters (inclusive)
    pub start: usize,

    /// End offset in characters (exclusive)
    pub end: usize,

    /// Exact text of `[start, end)`
    pub content: String,

    /// Sentences (or sentence pieces) covered by this chunk, trimmed
    pub sentences: Vec<String>,
}

impl TextChunk {
    /// Length of the chunk in characters
    #[must_use]
    pub const fn char_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Number of characters shared with another chunk
    #[must_use]
    pub fn overlap_with(&self, other: &Self) -> usize {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }

    /// Check if chunk covers a character offset
    #[must_use]
    pub const fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Rough chunk count forecast for a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkEstimate {
    pub estimated_chunks: usize,
    pub total_characters: usize,
    pub chunk_size: usize,
    pub overlap: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: usize, end: usize) -> TextChunk {
        TextChunk {
            chunk_index: 0,
            start,
            end,
            content: String::new(),
            sentences: Vec::new(),
        }
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = chunk(0, 10);
        let b = chunk(7, 20);
        assert_eq!(a.overlap_with(&b), 3);
        assert_eq!(b.overlap_with(&a), 3);
        assert_eq!(a.overlap_with(&chunk(10, 12)), 0);
    }

    #[test]
    fn contains_offset_is_half_open() {
        let c = chunk(5, 8);
        assert!(c.contains_offset(5));
        assert!(c.contains_offset(7));
        assert!(!c.contains_offset(8));
        assert_eq!(c.char_len(), 3);
    }
}
