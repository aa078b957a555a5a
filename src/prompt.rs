//! Conversation history and prompt assembly.
//!
//! [`ConversationHistory`] owns the session transcript with controlled
//! append operations: the system instruction is stored once (replaced, not
//! re-appended per turn), and user turns record the literal question — the
//! retrieval template is applied only to the outgoing message sequence in
//! [`assemble`].

use crate::models::ChatMessage;

/// The session transcript. Append-only within a session apart from the
/// system instruction slot, which is replaced as a unit.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    system: Option<String>,
    turns: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the role instruction. The instruction occupies a
    /// single system slot regardless of how many turns follow; an empty
    /// string clears it.
    pub fn set_system(&mut self, instruction: &str) {
        if instruction.is_empty() {
            self.system = None;
        } else {
            self.system = Some(instruction.to_string());
        }
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn push_user(&mut self, content: &str) {
        self.turns.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.turns.push(ChatMessage::assistant(content));
    }

    /// Completed turns, excluding the system slot.
    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// The full visible transcript: system instruction (if any) followed by
    /// all turns.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.turns.len() + 1);
        if let Some(system) = &self.system {
            out.push(ChatMessage::system(system.clone()));
        }
        out.extend(self.turns.iter().cloned());
        out
    }

    pub fn clear(&mut self) {
        self.system = None;
        self.turns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_none() && self.turns.is_empty()
    }
}

/// Build the message sequence for one completion call.
///
/// Order: the system instruction (at most once), every prior turn, then a
/// single user message for the current query — the literal query when no
/// retrieval context exists, or the context template otherwise. The current
/// query must not already be in `history`.
pub fn assemble(
    history: &ConversationHistory,
    context: Option<&str>,
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = history.messages();

    let user_content = match context {
        Some(context) => format!("{}\n\nUser question: {}", context, query),
        None => query.to_string(),
    };
    messages.push(ChatMessage::user(user_content));

    messages
}
