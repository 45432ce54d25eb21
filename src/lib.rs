//! Streaming Response Assembler (SRA)
//!
//! This crate assembles the incrementally streamed, chunked responses of a
//! chat backend into a progressively updated, ordered list of typed response
//! chunks suitable for incremental rendering, and regroups persisted chunk
//! lists into display groups.
//!
//! The wire format is a sequence of back-to-back JSON objects (no delimiter)
//! carried in an HTTP response body. Each object is a [`StreamChatChunk`]:
//! a `type` discriminant plus an incremental `delta`, with control frames
//! (`error`, finalize markers) embedded in the same stream.
//!
//! ## Pipeline
//!
//! ```text
//! raw text -> parser -> control-frame interceptor -> source aggregator
//!          -> merge/append engine -> ChatMessage::response_chunks
//!          -> (post-stream) display grouping
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use sra::{NoopEvents, StreamAssembler};
//!
//! let mut assembler = StreamAssembler::new(NoopEvents, true);
//! assembler.handle_text(r#"{"type":"response","delta":"Hello "}{"type":"response","delta":"world"}"#);
//! let chunks = assembler.finish();
//! assert_eq!(chunks[0].content, "Hello world");
//! ```
//!
//! ## Core Principles
//!
//! 1. **Pure state transitions**: the merge engine and the display grouping
//!    never mutate their inputs; callers rely on fresh values to detect change.
//! 2. **Forward compatibility**: unknown chunk types are opaque pass-through,
//!    merged by type equality like any other type.
//! 3. **Error isolation**: a malformed wire fragment is logged and skipped;
//!    it never aborts the read loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ============================================================================
// Modules
// ============================================================================

pub mod assembler;
pub mod grouping;
pub mod parser;
pub mod session;

pub use assembler::{
    merge_chunk, ControlFrame, NoopEvents, SourceBuffer, StreamAssembler, StreamEvents,
    StreamState, MIN_CONSECUTIVE_SOURCES_TO_COMBINE, PAYMENT_REQUIRED_STATUS,
};
pub use grouping::{collapse_source_runs, group_for_display};
pub use parser::parse_frames;
pub use session::{ChatSession, ConversationKey, SessionError};

// ============================================================================
// Chunk Types
// ============================================================================

/// Opening marker of a rendered citation piece (as emitted by the backend).
pub const SOURCE_MARKER_OPEN: char = '【';
/// Closing marker of a rendered citation piece.
pub const SOURCE_MARKER_CLOSE: char = '】';
/// Wrapper tag for a synthesized composite citation chunk.
pub const SOURCES_OPEN_TAG: &str = "<sources>";
/// Closing wrapper tag for a synthesized composite citation chunk.
pub const SOURCES_CLOSE_TAG: &str = "</sources>";

/// Discriminant of a response chunk.
///
/// Known values get a variant; anything else is carried verbatim in
/// [`ChunkType::Other`] so new backend chunk types flow through the
/// assembler untouched (merged by string equality like any other type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChunkType {
    /// Prose answer text
    Response,
    /// Citation into course material
    Source,
    /// Citation into a user-space document
    SpaceSource,
    /// Citation into a web search result
    WebSearchSource,
    /// Model reasoning shown to the user
    Thought,
    /// Structured quiz payload
    Quiz,
    /// Structured flashcard payload
    Flashcards,
    /// Whiteboard drawing spec
    Whiteboard,
    /// Chemistry diagram spec
    RdkitDiagram,
    /// In-app navigation instruction
    Navigate,
    /// Control frame: server-signalled failure
    Error,
    /// Any type this crate does not know about
    Other(String),
}

impl ChunkType {
    /// Convert to the wire string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Response => "response",
            Self::Source => "source",
            Self::SpaceSource => "space_source",
            Self::WebSearchSource => "web_search_source",
            Self::Thought => "thought",
            Self::Quiz => "quiz",
            Self::Flashcards => "flashcards",
            Self::Whiteboard => "whiteboard",
            Self::RdkitDiagram => "rdkit_diagram",
            Self::Navigate => "navigate",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }

    /// Whether this chunk is a citation rather than prose content.
    ///
    /// Source-like chunks are buffered by the aggregator and collapsed into
    /// one composite chunk when a long enough run arrives consecutively.
    pub fn is_source_like(&self) -> bool {
        matches!(self, Self::Source | Self::SpaceSource | Self::WebSearchSource)
    }

    /// Whether this is the server error control frame type.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl From<String> for ChunkType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "response" => Self::Response,
            "source" => Self::Source,
            "space_source" => Self::SpaceSource,
            "web_search_source" => Self::WebSearchSource,
            "thought" => Self::Thought,
            "quiz" => Self::Quiz,
            "flashcards" => Self::Flashcards,
            "whiteboard" => Self::Whiteboard,
            "rdkit_diagram" => Self::RdkitDiagram,
            "navigate" => Self::Navigate,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ChunkType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ChunkType> for String {
    fn from(t: ChunkType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Response Chunks
// ============================================================================

/// Nested payload descriptor carried by web search citations.
///
/// Only `type` matters to this crate (the display-grouping allow-list);
/// everything else rides through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDict {
    /// Kind of the underlying document (e.g. "webpage", "pdf")
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Remaining payload, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One typed, accumulated piece of an assistant response.
///
/// `content` grows as deltas are merged in; `done` is set once the chunk
/// will receive no more deltas. Type-specific payload fields the assembler
/// does not interpret (quiz questions, flashcard decks, whiteboard specs)
/// are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Chunk discriminant
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// Accumulated text for this chunk so far
    #[serde(default)]
    pub content: String,
    /// True once the chunk will receive no more deltas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    /// Display title attached by a finalize frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Bounding box of a citation into paged material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<serde_json::Value>,
    /// Source index of a citation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    /// Whiteboard sub-kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wtype: Option<String>,
    /// Nested payload descriptor (web search citations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_dict: Option<ContentDict>,
    /// Type-specific payload preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResponseChunk {
    /// Create an open chunk of the given type with initial content
    pub fn new(chunk_type: impl Into<ChunkType>, content: impl Into<String>) -> Self {
        Self {
            chunk_type: chunk_type.into(),
            content: content.into(),
            done: None,
            title: None,
            bbox: None,
            source: None,
            wtype: None,
            content_dict: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Mark the chunk done
    pub fn with_done(mut self) -> Self {
        self.done = Some(true);
        self
    }

    /// Attach a display title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Attach citation bbox metadata
    pub fn with_bbox(mut self, bbox: serde_json::Value) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Attach citation source-index metadata
    pub fn with_source(mut self, source: serde_json::Value) -> Self {
        self.source = Some(source);
        self
    }

    /// Whether the chunk is closed to further deltas
    pub fn is_done(&self) -> bool {
        self.done == Some(true)
    }
}

// ============================================================================
// Wire Events
// ============================================================================

/// One incremental event as decoded from the response byte stream.
///
/// Content frames carry a `delta` to append; `error` frames additionally
/// carry `status`/`service`; finalize frames carry `delta == "done"` plus a
/// `title`. Unknown fields are preserved in `extra` and copied onto the
/// chunk they seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChatChunk {
    /// Event discriminant (same space as [`ChunkType`], plus controls)
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// Incremental text fragment to append
    #[serde(default)]
    pub delta: String,
    /// HTTP-like status code, only present on error frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Failing backend service name, only present on error frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Display title, only present on finalize frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Bounding box of a citation into paged material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<serde_json::Value>,
    /// Source index of a citation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    /// Whiteboard sub-kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wtype: Option<String>,
    /// Nested payload descriptor (web search citations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_dict: Option<ContentDict>,
    /// Remaining payload, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StreamChatChunk {
    /// Create a bare content event
    pub fn new(chunk_type: impl Into<ChunkType>, delta: impl Into<String>) -> Self {
        Self {
            chunk_type: chunk_type.into(),
            delta: delta.into(),
            status: None,
            service: None,
            title: None,
            bbox: None,
            source: None,
            wtype: None,
            content_dict: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Seed an open response chunk from this event's delta and metadata
    pub fn to_chunk(&self) -> ResponseChunk {
        ResponseChunk {
            chunk_type: self.chunk_type.clone(),
            content: self.delta.clone(),
            done: None,
            title: None,
            bbox: self.bbox.clone(),
            source: self.source.clone(),
            wtype: self.wtype.clone(),
            content_dict: self.content_dict.clone(),
            extra: self.extra.clone(),
        }
    }
}

// ============================================================================
// Chat Messages
// ============================================================================

/// A message in a conversation, as persisted and as mutated during streaming.
///
/// A user/assistant pair is created optimistically when a chat request is
/// dispatched; the assistant placeholder's `response_chunks` grows (strictly
/// in arrival order) as the stream is consumed, and the message becomes
/// immutable once the stream ends and history is refetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    #[serde(rename = "_id")]
    pub id: String,
    /// User text (empty for the assistant placeholder)
    pub message: String,
    /// Legacy full-text response field
    #[serde(default)]
    pub response: String,
    /// Ordered, append/merge-target chunk list
    #[serde(default)]
    pub response_chunks: Vec<ResponseChunk>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Quoted text this message replies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Attached image URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    /// Context document ids supplied with the request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_document_ids: Vec<String>,
    /// Originating question id (exam/quiz flows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            message: text.into(),
            response: String::new(),
            response_chunks: Vec::new(),
            created_at: Utc::now(),
            quote: None,
            image_urls: Vec::new(),
            context_document_ids: Vec::new(),
            question_id: None,
        }
    }

    /// Create an empty assistant placeholder awaiting a stream
    pub fn assistant_placeholder() -> Self {
        Self::user("")
    }

    /// Set the quoted text
    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    /// Set attached image URLs
    pub fn with_images(mut self, urls: Vec<String>) -> Self {
        self.image_urls = urls;
        self
    }

    /// Set context document ids
    pub fn with_context_documents(mut self, ids: Vec<String>) -> Self {
        self.context_document_ids = ids;
        self
    }

    /// Set the originating question id
    pub fn with_question_id(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_type_round_trip() {
        assert_eq!(ChunkType::from("response"), ChunkType::Response);
        assert_eq!(ChunkType::from("space_source"), ChunkType::SpaceSource);
        assert_eq!(ChunkType::Response.as_str(), "response");
        assert_eq!(ChunkType::WebSearchSource.as_str(), "web_search_source");

        // Unknown types survive verbatim and compare by value
        let t = ChunkType::from("thought_calculation");
        assert_eq!(t, ChunkType::Other("thought_calculation".to_string()));
        assert_eq!(t.as_str(), "thought_calculation");
        assert_eq!(t, ChunkType::from("thought_calculation"));
    }

    #[test]
    fn test_source_like_predicate() {
        assert!(ChunkType::Source.is_source_like());
        assert!(ChunkType::SpaceSource.is_source_like());
        assert!(ChunkType::WebSearchSource.is_source_like());
        assert!(!ChunkType::Response.is_source_like());
        assert!(!ChunkType::from("totally_new").is_source_like());
    }

    #[test]
    fn test_wire_chunk_deserialization() {
        let frame: StreamChatChunk =
            serde_json::from_str(r#"{"type":"response","delta":"Hi"}"#).unwrap();
        assert_eq!(frame.chunk_type, ChunkType::Response);
        assert_eq!(frame.delta, "Hi");
        assert!(frame.status.is_none());

        let frame: StreamChatChunk = serde_json::from_str(
            r#"{"type":"error","delta":"Payment required","status":402,"service":"chat"}"#,
        )
        .unwrap();
        assert_eq!(frame.chunk_type, ChunkType::Error);
        assert_eq!(frame.status, Some(402));
        assert_eq!(frame.service.as_deref(), Some("chat"));
    }

    #[test]
    fn test_wire_chunk_preserves_unknown_payload() {
        let frame: StreamChatChunk = serde_json::from_str(
            r#"{"type":"quiz","delta":"","questions":[{"q":"2+2?","a":"4"}]}"#,
        )
        .unwrap();
        assert_eq!(frame.chunk_type, ChunkType::Quiz);
        assert!(frame.extra.contains_key("questions"));

        let chunk = frame.to_chunk();
        assert!(chunk.extra.contains_key("questions"));

        // And the payload survives re-serialization
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["questions"][0]["a"], "4");
    }

    #[test]
    fn test_response_chunk_serde_shape() {
        let chunk = ResponseChunk::new("response", "Hello").with_done();
        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(json["type"], "response");
        assert_eq!(json["content"], "Hello");
        assert_eq!(json["done"], true);
        // Unset optionals are omitted entirely
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 3);
    }

    #[test]
    fn test_content_dict_kind() {
        let chunk: ResponseChunk = serde_json::from_str(
            r#"{"type":"web_search_source","content":"【x】","content_dict":{"type":"pdf","url":"https://e.example/x.pdf"}}"#,
        )
        .unwrap();
        let dict = chunk.content_dict.unwrap();
        assert_eq!(dict.kind.as_deref(), Some("pdf"));
        assert!(dict.extra.contains_key("url"));
    }

    #[test]
    fn test_chat_message_creation() {
        let msg = ChatMessage::user("Explain entropy")
            .with_quote("the second law")
            .with_question_id("q_42");
        assert!(!msg.id.is_empty());
        assert_eq!(msg.message, "Explain entropy");
        assert!(msg.response_chunks.is_empty());
        assert_eq!(msg.quote.as_deref(), Some("the second law"));
        assert_eq!(msg.question_id.as_deref(), Some("q_42"));

        let placeholder = ChatMessage::assistant_placeholder();
        assert!(placeholder.message.is_empty());
        assert_ne!(placeholder.id, msg.id);
    }

    #[test]
    fn test_chat_message_serde_uses_underscore_id() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["_id"], msg.id.as_str());
        assert!(json.get("quote").is_none());

        let back: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
