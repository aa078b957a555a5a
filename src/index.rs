//! In-memory vector index over (embedding, chunk) pairs.
//!
//! Search is a brute-force cosine scan over all stored vectors; there is no
//! update or delete. A changed document set is handled by building a fresh
//! index and swapping it in wholesale (the session holds an `Arc`, so
//! readers never observe a partially built index).

use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("parallel input length mismatch: {chunks} chunks, {embeddings} embeddings")]
    LengthMismatch { chunks: usize, embeddings: usize },
}

#[derive(Debug)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Immutable similarity index for one document set.
#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<Entry>,
}

impl VectorIndex {
    /// Build an index from parallel chunk and embedding sequences.
    ///
    /// All embeddings must share one dimension (fixed by the first); the
    /// two sequences must have equal length.
    pub fn build(chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        let dims = embeddings.first().map(|v| v.len()).unwrap_or(0);
        for vector in &embeddings {
            if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    found: vector.len(),
                });
            }
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| Entry { chunk, vector })
            .collect();

        Ok(Self { dims, entries })
    }

    /// Return the `k` most similar chunks, ordered by descending cosine
    /// similarity. Ties keep insertion order (stable sort).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                found: query.len(),
            });
        }

        let mut results: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);

        Ok(results)
    }

    /// Embedding dimensionality of this index (0 when empty).
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
