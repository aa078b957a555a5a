//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into windows of `chunk_size` characters,
//! each window advancing by `chunk_size - overlap` so that consecutive
//! chunks share `overlap` characters. The final chunk may be shorter.
//!
//! Boundaries are character boundaries, never byte offsets, so multi-byte
//! UTF-8 text is split safely. Each chunk receives a fresh UUID plus a
//! SHA-256 hash of its text for identity.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Split text into overlapping windows. `overlap` must be < `chunk_size`
/// (enforced at config load). Empty input yields no chunks; no produced
/// chunk is ever empty. The chunk texts and indices are deterministic for
/// identical inputs and parameters.
pub fn chunk_text(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    assert!(chunk_size > 0, "chunk_size must be > 0");
    assert!(overlap < chunk_size, "overlap must be < chunk_size");

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the text, so a
    // window [i, j) in char space maps to a &str slice.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let n_chars = boundaries.len() - 1;

    let step = chunk_size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        let end = (start + chunk_size).min(n_chars);
        let piece = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, chunk_index, piece));
        chunk_index += 1;

        if end == n_chars {
            break;
        }
        start += step;
    }

    chunks
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 100, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_no_chunks() {
        let chunks = chunk_text("doc1", "", 100, 20);
        assert!(chunks.is_empty());
    }

    #[test]
    fn no_chunk_is_empty() {
        let text = "abcdefghij".repeat(37);
        let chunks = chunk_text("doc1", &text, 100, 30);
        assert!(chunks.iter().all(|c| !c.text.is_empty()));
    }

    #[test]
    fn windows_overlap_and_cover_source() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunk_size = 1000;
        let overlap = 200;
        let chunks = chunk_text("doc1", &text, chunk_size, overlap);

        // Reconstruct by dropping each chunk's leading overlap after the first.
        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            let skipped: String = c.text.chars().skip(overlap).collect();
            rebuilt.push_str(&skipped);
        }
        assert_eq!(rebuilt, text);

        // Consecutive chunks share exactly `overlap` characters.
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - overlap)
                .collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn window_arithmetic_1000_200_2500() {
        // 2500 chars with a 1000-char window advancing by 800: windows at
        // 0, 800, and 1600, the last truncated at end-of-text.
        let text = "x".repeat(2500);
        let chunks = chunk_text("doc1", &text, 1000, 200);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.len(), 1000);
        assert_eq!(chunks[1].text.len(), 1000);
        assert_eq!(chunks[2].text.len(), 900);
    }

    #[test]
    fn indices_contiguous_from_zero() {
        let text = "paragraph ".repeat(500);
        let chunks = chunk_text("doc1", &text, 200, 50);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "日本語のテキスト。".repeat(300);
        let chunks = chunk_text("doc1", &text, 100, 25);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
        let mut rebuilt = chunks[0].text.clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.text.chars().skip(25));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta.".repeat(40);
        let c1 = chunk_text("doc1", &text, 120, 40);
        let c2 = chunk_text("doc1", &text, 120, 40);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }

    #[test]
    fn zero_overlap_partitions_exactly() {
        let text = "y".repeat(1050);
        let chunks = chunk_text("doc1", &text, 500, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.len(), 50);
        let total: usize = chunks.iter().map(|c| c.text.len()).sum();
        assert_eq!(total, 1050);
    }
}
