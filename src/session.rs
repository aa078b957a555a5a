//! Session state: conversation history, the current vector index, and the
//! runtime-adjustable settings.
//!
//! One session means one history and at most one index. A chat turn runs
//! retrieve → assemble → stream → append; the history-consistency rules are
//! strict: the user turn is recorded only once the completion request has
//! been accepted, a mid-stream failure appends the partial answer plus a
//! visible error note, and no failure mode leaves a half-written turn that
//! could corrupt later turns.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::{Backend, CompletionClient, CompletionError};
use crate::config::Config;
use crate::embedding::{create_provider, EmbedError, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::ingest::{self, DocumentInput, IngestError, IngestReport};
use crate::prompt::{assemble, ConversationHistory};
use crate::retrieve::{retrieve, RetrieveError};

/// The runtime-adjustable configuration surface of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub role_instruction: String,
    pub temperature: f32,
    pub backend: Backend,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

pub struct Session {
    config: Config,
    history: ConversationHistory,
    index: Option<Arc<VectorIndex>>,
    provider: Box<dyn EmbeddingProvider>,
}

impl Session {
    pub fn new(config: Config) -> Result<Self, EmbedError> {
        let provider = create_provider(&config.embedding)?;
        let mut history = ConversationHistory::new();
        history.set_system(&config.session.role_instruction);

        Ok(Self {
            config,
            history,
            index: None,
            provider,
        })
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            role_instruction: self.config.session.role_instruction.clone(),
            temperature: self.config.session.temperature,
            backend: self.config.completion.backend,
            model: self.config.completion.model.clone(),
        }
    }

    /// Apply new settings. Switching the completion backend or model only
    /// changes where the next turn is routed; the index and history are
    /// untouched.
    pub fn update_settings(&mut self, settings: SessionSettings) {
        self.config.session.role_instruction = settings.role_instruction;
        self.config.session.temperature = settings.temperature;
        self.config.completion.backend = settings.backend;
        self.config.completion.model = settings.model;
        self.history
            .set_system(&self.config.session.role_instruction);
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Rebuild the index for a new document set and swap it in atomically.
    ///
    /// On any embedding or build failure the previous index stays in place.
    /// A batch from which no document survived extraction also leaves the
    /// previous index untouched (the failures are in the report).
    pub async fn rebuild_index(
        &mut self,
        inputs: &[DocumentInput],
    ) -> Result<IngestReport, IngestError> {
        let (index, report) =
            ingest::build_index(&self.config, self.provider.as_ref(), inputs).await?;
        if let Some(index) = index {
            self.index = Some(Arc::new(index));
        }
        Ok(report)
    }

    /// Drop the conversation and the index. The configured role instruction
    /// survives the reset (it is configuration, not transcript).
    pub fn reset(&mut self) {
        self.history.clear();
        self.history
            .set_system(&self.config.session.role_instruction);
        self.index = None;
    }

    /// Run one chat turn, invoking `on_delta` for every streamed fragment.
    /// `on_delta` returns `false` to cancel consumption; the partial answer
    /// is then recorded as the assistant turn.
    ///
    /// Returns the full (or partial, if cancelled) answer text.
    pub async fn chat_turn(
        &mut self,
        query: &str,
        on_delta: &mut (dyn FnMut(&str) -> bool + Send),
    ) -> Result<String, SessionError> {
        let context = retrieve(
            self.provider.as_ref(),
            &self.config.embedding,
            self.index.as_deref(),
            query,
            self.config.retrieval.top_k,
        )
        .await?;

        let messages = assemble(&self.history, context.as_deref(), query);

        let client = CompletionClient::from_config(&self.config.completion)?;
        let mut stream = client
            .stream_chat(&messages, self.config.session.temperature)
            .await?;

        // The request was accepted: from here on the turn is part of the
        // transcript, whatever happens to the stream.
        self.history.push_user(query);

        let mut answer = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    answer.push_str(&delta);
                    if !on_delta(&delta) {
                        break;
                    }
                }
                Err(e) => {
                    let note = if answer.is_empty() {
                        format!("[error: {}]", e)
                    } else {
                        format!("{}\n\n[error: {}]", answer, e)
                    };
                    self.history.push_assistant(&note);
                    return Err(e.into());
                }
            }
        }

        self.history.push_assistant(&answer);
        Ok(answer)
    }
}

#[cfg(test)]
impl Session {
    fn install_index(&mut self, index: VectorIndex) {
        self.index = Some(Arc::new(index));
    }
}
