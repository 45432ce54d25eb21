//! Recognition of control frames embedded in the content stream.

use crate::{ChunkType, StreamChatChunk};

/// Delta value that marks a finalize frame (paired with a `title`)
pub const DONE_DELTA: &str = "done";

/// Classification of one wire event, decided before aggregation.
///
/// Error and finalize frames are not renderable content: they divert to
/// side effects and to the chunk-closing path respectively, and never reach
/// the source buffer or the merge engine as deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// Server-signalled failure; `status_text` is the frame's delta
    Error {
        status: Option<u16>,
        status_text: String,
        service: Option<String>,
    },
    /// Closes the most recent open chunk of `chunk_type`
    Finalize { chunk_type: ChunkType, title: String },
    /// Ordinary content, forwarded to aggregation
    Content,
}

impl ControlFrame {
    /// Classify a wire event.
    pub fn classify(frame: &StreamChatChunk) -> Self {
        if frame.chunk_type.is_error() {
            return Self::Error {
                status: frame.status,
                status_text: frame.delta.clone(),
                service: frame.service.clone(),
            };
        }
        if frame.delta == DONE_DELTA {
            if let Some(title) = &frame.title {
                return Self::Finalize {
                    chunk_type: frame.chunk_type.clone(),
                    title: title.clone(),
                };
            }
        }
        Self::Content
    }
}
