//! Core data types used throughout the pipeline.
//!
//! These types represent the documents, chunks, and chat messages that flow
//! from upload through retrieval to the completion backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded document after text extraction. Raw bytes are dropped once
/// the text has been pulled out; the document lives only for the session.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Display name, usually the uploaded filename.
    pub name: String,
    pub content_type: String,
    /// Extracted plain text.
    pub text: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from a similarity search, with its cosine score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Speaker role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the chat-completions wire format shared by both
/// completion backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
