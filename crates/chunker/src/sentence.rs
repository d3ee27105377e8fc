use unicode_segmentation::UnicodeSegmentation;

/// Character range `[start, end)` of one packing unit (a sentence or a piece
/// of an oversized sentence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn len(self) -> usize {
        self.end - self.start
    }
}

/// Split text on Unicode sentence boundaries. The returned spans tile the
/// text: each span starts where the previous one ended.
pub(crate) fn sentence_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = 0usize;
    for sentence in text.split_sentence_bounds() {
        let len = sentence.chars().count();
        if len == 0 {
            continue;
        }
        spans.push(Span {
            start: cursor,
            end: cursor + len,
        });
        cursor += len;
    }
    spans
}

/// Hard-split every span longer than `max_len` into `max_len` pieces.
pub(crate) fn split_oversized(spans: Vec<Span>, max_len: usize) -> Vec<Span> {
    let mut out = Vec::with_capacity(spans.len());
    for span in spans {
        if span.len() <= max_len {
            out.push(span);
            continue;
        }
        let mut start = span.start;
        while start < span.end {
            let end = (start + max_len).min(span.end);
            out.push(Span { start, end });
            start = end;
        }
    }
    out
}
