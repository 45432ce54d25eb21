//! Per-conversation lifecycle: optimistic sends, rollback, de-duplication.
//!
//! A [`ChatSession`] owns the message list for one conversation key, the
//! compose-box draft, and the bookkeeping around an in-flight send: the
//! user/assistant placeholder pair is applied optimistically and a snapshot
//! of the prior state is kept, keyed by a request id, until the send either
//! commits (stream completed, history refetched) or rolls back (transport
//! failure). Rolling back restores the snapshot and re-seeds the draft with
//! the original query so the user's text is never lost.
//!
//! Sends against one key are serialized: a second `send` while one is in
//! flight is rejected rather than racing the shared message list.

use crate::{ChatMessage, ResponseChunk};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;
use ulid::Ulid;

/// Errors from session operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A send is already in flight for this conversation key
    #[error("a send is already in flight for this conversation")]
    SendInFlight,
    /// The request id does not match the in-flight send
    #[error("unknown request id: {0}")]
    UnknownRequest(String),
}

/// Identity of the shared cache entry a session mutates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Which tutor persona/flow this conversation belongs to
    pub chatbot_type: String,
    /// The course content the conversation is anchored to
    pub content_id: String,
    /// Optional user-space scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

impl ConversationKey {
    /// Create a key without a space scope
    pub fn new(chatbot_type: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            chatbot_type: chatbot_type.into(),
            content_id: content_id.into(),
            space_id: None,
        }
    }

    /// Scope the key to a user space
    pub fn with_space(mut self, space_id: impl Into<String>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }
}

/// Bookkeeping for one optimistic send
#[derive(Debug)]
struct PendingSend {
    request_id: String,
    query: String,
    snapshot: Vec<ChatMessage>,
    assistant_id: String,
}

/// State of one conversation on the client.
#[derive(Debug)]
pub struct ChatSession {
    key: ConversationKey,
    messages: Vec<ChatMessage>,
    draft: String,
    pending: Option<PendingSend>,
    seen_events: HashSet<String>,
}

impl ChatSession {
    /// Create an empty session for a conversation key
    pub fn new(key: ConversationKey) -> Self {
        Self::with_history(key, Vec::new())
    }

    /// Create a session seeded with persisted history
    pub fn with_history(key: ConversationKey, messages: Vec<ChatMessage>) -> Self {
        Self {
            key,
            messages,
            draft: String::new(),
            pending: None,
            seen_events: HashSet::new(),
        }
    }

    /// The conversation key this session mutates
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Current message list (optimistic state included)
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Current compose-box draft
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the compose-box draft
    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    /// Whether a send is in flight
    pub fn is_sending(&self) -> bool {
        self.pending.is_some()
    }

    /// Dispatch a chat request optimistically.
    ///
    /// Snapshots the current message list, appends the user message and an
    /// empty assistant placeholder, clears the draft, and returns the
    /// request id that `commit`/`rollback` must present. Fails with
    /// [`SessionError::SendInFlight`] while another send is pending.
    pub fn send(&mut self, text: impl Into<String>) -> Result<String, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::SendInFlight);
        }
        let query = text.into();
        let request_id = Ulid::new().to_string();
        let snapshot = self.messages.clone();

        let placeholder = ChatMessage::assistant_placeholder();
        let assistant_id = placeholder.id.clone();
        self.messages.push(ChatMessage::user(query.clone()));
        self.messages.push(placeholder);
        self.draft.clear();

        debug!(request_id = %request_id, "optimistic message pair applied");
        self.pending = Some(PendingSend {
            request_id: request_id.clone(),
            query,
            snapshot,
            assistant_id,
        });
        Ok(request_id)
    }

    /// Write the assembled chunk list into the in-flight assistant placeholder.
    ///
    /// Called after each cache update during streaming and once more with
    /// the final list.
    pub fn update_response(
        &mut self,
        request_id: &str,
        chunks: Vec<ResponseChunk>,
    ) -> Result<(), SessionError> {
        let assistant_id = self.pending_for(request_id)?.assistant_id.clone();
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == assistant_id) {
            message.response_chunks = chunks;
        }
        Ok(())
    }

    /// Settle a successful send: the optimistic state becomes the state.
    pub fn commit(&mut self, request_id: &str) -> Result<(), SessionError> {
        self.pending_for(request_id)?;
        self.pending = None;
        self.seen_events.clear();
        Ok(())
    }

    /// Roll a failed send back to the snapshot and re-seed the draft.
    pub fn rollback(&mut self, request_id: &str) -> Result<(), SessionError> {
        match self.pending.take() {
            Some(pending) if pending.request_id == request_id => {
                debug!(request_id = %pending.request_id, "rolling back optimistic send");
                self.messages = pending.snapshot;
                self.draft = pending.query;
                self.seen_events.clear();
                Ok(())
            }
            other => {
                self.pending = other;
                Err(SessionError::UnknownRequest(request_id.to_string()))
            }
        }
    }

    /// Re-seed the draft with the in-flight query without rolling back.
    ///
    /// Used when a server error frame arrives mid-stream: the conversation
    /// stays, but the user gets their text back in the compose box.
    pub fn reseed_draft(&mut self, request_id: &str) -> Result<(), SessionError> {
        let query = self.pending_for(request_id)?.query.clone();
        self.draft = query;
        Ok(())
    }

    /// Record a server event id, reporting whether it was seen before.
    ///
    /// Returns `true` the first time an id appears. The set is scoped to the
    /// in-flight request and cleared when it settles; it never grows across
    /// requests.
    pub fn mark_seen(&mut self, event_id: &str) -> bool {
        self.seen_events.insert(event_id.to_string())
    }

    fn pending_for(&self, request_id: &str) -> Result<&PendingSend, SessionError> {
        match &self.pending {
            Some(pending) if pending.request_id == request_id => Ok(pending),
            _ => Err(SessionError::UnknownRequest(request_id.to_string())),
        }
    }
}
