//! Ingestion pipeline orchestration.
//!
//! Coordinates the full upload flow: extraction → chunking → batched
//! embedding → index build. One malformed document never aborts the batch;
//! its failure is recorded per file and the remaining documents proceed.
//! Embedding failures abort the build before any index replacement, so the
//! session's previous index stays intact.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{self, EmbedError, EmbeddingProvider};
use crate::extract::extract_text;
use crate::index::{IndexError, VectorIndex};
use crate::models::{Chunk, Document};

/// One file handed to the pipeline: raw bytes plus the declared type.
pub struct DocumentInput {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Per-file result reported back to the uploader.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub name: String,
    /// Number of chunks produced; 0 when extraction failed or the document
    /// was empty.
    pub chunks: usize,
    /// Extraction error message, if this file was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one ingestion run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub documents: Vec<DocumentOutcome>,
    pub chunks: usize,
    pub embedded: usize,
    /// Embedding dimensionality of the built index (0 when nothing was
    /// indexed).
    pub dims: usize,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Extraction + chunking results, before any backend is involved.
pub struct Prepared {
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    pub outcomes: Vec<DocumentOutcome>,
}

/// Extract and chunk a batch of inputs. Per-file failures are recorded in
/// the outcomes and logged; they never fail the batch.
pub fn extract_and_chunk(config: &Config, inputs: &[DocumentInput]) -> Prepared {
    let mut documents = Vec::new();
    let mut chunks = Vec::new();
    let mut outcomes = Vec::new();

    for input in inputs {
        let text = match extract_text(&input.bytes, &input.content_type) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("skipping {}: {}", input.name, e);
                outcomes.push(DocumentOutcome {
                    name: input.name.clone(),
                    chunks: 0,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let document = Document {
            id: Uuid::new_v4().to_string(),
            name: input.name.clone(),
            content_type: input.content_type.clone(),
            text,
            uploaded_at: Utc::now(),
        };

        let doc_chunks = chunk_text(
            &document.id,
            &document.text,
            config.chunking.chunk_size,
            config.chunking.overlap,
        );

        outcomes.push(DocumentOutcome {
            name: input.name.clone(),
            chunks: doc_chunks.len(),
            error: None,
        });
        chunks.extend(doc_chunks);
        documents.push(document);
    }

    Prepared {
        documents,
        chunks,
        outcomes,
    }
}

/// Run the full pipeline and build a fresh index for the given inputs.
///
/// Returns `None` for the index when no chunks survived extraction. The
/// caller is responsible for swapping the returned index into the session
/// (the swap, not this build, is what must be atomic).
pub async fn build_index(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    inputs: &[DocumentInput],
) -> Result<(Option<VectorIndex>, IngestReport), IngestError> {
    let prepared = extract_and_chunk(config, inputs);

    if prepared.chunks.is_empty() {
        return Ok((
            None,
            IngestReport {
                documents: prepared.outcomes,
                chunks: 0,
                embedded: 0,
                dims: 0,
            },
        ));
    }

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(prepared.chunks.len());
    for batch in prepared.chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let batch_vectors = embedding::embed_texts(provider, &config.embedding, &texts).await?;
        vectors.extend(batch_vectors);
    }

    let embedded = vectors.len();
    let chunk_count = prepared.chunks.len();
    let index = VectorIndex::build(prepared.chunks, vectors)?;

    let report = IngestReport {
        documents: prepared.outcomes,
        chunks: chunk_count,
        embedded,
        dims: index.dims(),
    };

    Ok((Some(index), report))
}
