//! Query-time retrieval: embed the question, rank indexed chunks, and
//! return the concatenated context for prompt assembly.

use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::embedding::{self, EmbedError, EmbeddingProvider};
use crate::index::{IndexError, VectorIndex};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// The query was embedded with a backend whose dimension does not match
    /// the index. Embedding backend must stay fixed for a session; treat as
    /// a fatal configuration error.
    #[error("embedding backend mismatch: query dimension {query} vs index dimension {index}")]
    BackendMismatch { query: usize, index: usize },
}

/// Retrieve the concatenated text of the `top_k` chunks most relevant to
/// `query`. Returns `Ok(None)` when the session has no index (the caller
/// then sends the question ungrounded).
pub async fn retrieve(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    index: Option<&VectorIndex>,
    query: &str,
    top_k: usize,
) -> Result<Option<String>, RetrieveError> {
    let index = match index {
        Some(index) if !index.is_empty() => index,
        _ => return Ok(None),
    };

    let query_vec = embedding::embed_query(provider, config, query).await?;

    let results = index
        .search(&query_vec, top_k)
        .map_err(|e| match e {
            IndexError::DimensionMismatch { expected, found } => RetrieveError::BackendMismatch {
                query: found,
                index: expected,
            },
            // Unreachable from search, but keep the mapping total.
            IndexError::LengthMismatch { .. } => RetrieveError::BackendMismatch {
                query: query_vec.len(),
                index: index.dims(),
            },
        })?;

    if results.is_empty() {
        return Ok(None);
    }

    let context = results
        .iter()
        .map(|r| r.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    Ok(Some(context))
}
