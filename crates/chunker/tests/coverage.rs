use semindex_chunker::{Chunker, ChunkerConfig, TextChunk};

const SENTENCES: &[&str] = &[
    "Patient admitted through the emergency department with acute chest pain radiating to the left arm.",
    "Initial ECG showed sinus rhythm without ST elevation.",
    "Troponin levels were measured at admission and six hours later, both within normal limits.",
    "Past medical history includes hypertension treated with an ACE inhibitor and type 2 diabetes.",
    "The patient reports no tobacco use and occasional alcohol consumption.",
    "Physical examination was unremarkable apart from mild tachycardia.",
    "A stress test was scheduled and performed on the second day without inducible ischemia.",
    "Echocardiography demonstrated preserved left ventricular function.",
    "Discharged home with aspirin, continued antihypertensive therapy and cardiology follow-up in two weeks.",
];

fn long_document() -> String {
    let mut doc = String::new();
    for round in 0..4 {
        for sentence in SENTENCES {
            doc.push_str(sentence);
            doc.push(' ');
        }
        if round % 2 == 0 {
            doc.push_str("\n\n\x0c");
        }
    }
    doc
}

fn default_chunker() -> Chunker {
    Chunker::new(ChunkerConfig::default()).expect("default config is valid")
}

fn assert_invariants(chunks: &[TextChunk], total: usize, chunk_size: usize, overlap: usize) {
    assert!(!chunks.is_empty(), "expected at least one chunk");
    assert_eq!(chunks[0].start, 0, "first chunk must start at 0");
    assert_eq!(
        chunks.last().expect("non-empty").end,
        total,
        "last chunk must end at text length"
    );

    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i, "chunk indices must be monotonic");
        assert!(
            chunk.char_len() <= chunk_size,
            "chunk {i} has {} characters (limit {chunk_size})",
            chunk.char_len()
        );
        assert!(chunk.char_len() > 0, "chunk {i} is empty");
    }

    for pair in chunks.windows(2) {
        assert!(
            pair[1].start <= pair[0].end,
            "gap between chunk {} and {}",
            pair[0].chunk_index,
            pair[1].chunk_index
        );
        assert!(
            pair[0].overlap_with(&pair[1]) <= overlap,
            "chunks {} and {} share {} characters",
            pair[0].chunk_index,
            pair[1].chunk_index,
            pair[0].overlap_with(&pair[1])
        );
    }
}

#[test]
fn long_document_is_fully_covered() {
    let chunker = default_chunker();
    let doc = long_document();
    let normalized = Chunker::normalize(&doc);
    let total = normalized.chars().count();

    let chunks = chunker.chunk_text(&doc);
    assert!(chunks.len() > 3, "expected several chunks, got {}", chunks.len());
    assert_invariants(&chunks, total, 512, 50);

    let mut covered = vec![false; total];
    for chunk in &chunks {
        for slot in &mut covered[chunk.start..chunk.end] {
            *slot = true;
        }
    }
    assert!(covered.iter().all(|c| *c), "every character must be covered");
}

#[test]
fn chunks_respect_sentence_boundaries() {
    let chunker = default_chunker();
    let chunks = chunker.chunk_text(&long_document());
    for chunk in &chunks {
        let trimmed = chunk.content.trim_end();
        assert!(
            trimmed.ends_with('.'),
            "chunk {} should end on a sentence: {:?}",
            chunk.chunk_index,
            &trimmed[trimmed.len().saturating_sub(30)..]
        );
        assert!(!chunk.sentences.is_empty());
    }
}

#[test]
fn document_without_punctuation_is_hard_split() {
    let chunker = default_chunker();
    let doc = "word ".repeat(400);
    let normalized = Chunker::normalize(&doc);
    let total = normalized.chars().count();

    let chunks = chunker.chunk_text(&doc);
    assert_eq!(chunks.len(), total.div_ceil(512));
    assert_invariants(&chunks, total, 512, 50);
}

#[test]
fn multibyte_text_uses_character_offsets() {
    let chunker = Chunker::new(ChunkerConfig {
        chunk_size: 80,
        overlap: 20,
        min_chunk_chars: 0,
    })
    .expect("valid config");
    let doc = "Épisode fébrile à 39°C résolu sous paracétamol. \
               Échographie abdominale : pas d'anomalie décelée. \
               Créatininémie stable à 85 µmol/l. \
               Retour à domicile prévu après réévaluation.";
    let normalized = Chunker::normalize(doc);
    let chars: Vec<char> = normalized.chars().collect();

    let chunks = chunker.chunk_text(doc);
    assert_invariants(&chunks, chars.len(), 80, 20);
    for chunk in &chunks {
        let expected: String = chars[chunk.start..chunk.end].iter().collect();
        assert_eq!(chunk.content, expected);
    }
}

#[test]
fn minimum_length_edge_case() {
    let chunker = default_chunker();
    let exactly_fifty = "a".repeat(50);
    let forty_nine = "a".repeat(49);

    assert_eq!(chunker.chunk_text(&exactly_fifty).len(), 1);
    assert!(chunker.chunk_text(&forty_nine).is_empty());
    // Whitespace does not count towards the minimum once normalized.
    let padded = format!("   {forty_nine}\n\n   ");
    assert!(chunker.chunk_text(&padded).is_empty());
}

#[test]
fn estimate_is_close_to_actual_count() {
    let chunker = default_chunker();
    let doc = long_document();
    let estimate = chunker.estimate_chunks(&doc);
    let actual = chunker.chunk_text(&doc).len();
    assert!(estimate.estimated_chunks > 0);
    assert!(
        estimate.estimated_chunks.abs_diff(actual) <= actual,
        "estimate {} too far from actual {actual}",
        estimate.estimated_chunks
    );
}
