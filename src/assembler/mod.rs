//! Live assembly of a streamed response into an ordered chunk list.
//!
//! One [`StreamAssembler`] is scoped to one stream-read loop. Each decoded
//! text fragment is parsed into wire events, control frames (errors,
//! finalize markers) are intercepted and routed to side effects, citation
//! runs are buffered and collapsed, and everything else flows through the
//! pure merge/append engine into the growing chunk list.
//!
//! Processing is strictly in arrival order; the pipeline is not reentrant,
//! so one read loop drives one assembler.

mod aggregator;
mod control;
mod merge;

pub use aggregator::{render_source_piece, SourceBuffer, MIN_CONSECUTIVE_SOURCES_TO_COMBINE};
pub use control::{ControlFrame, DONE_DELTA};
pub use merge::{finalize_chunk, merge_chunk};

use crate::parser::parse_frames;
use crate::{ChunkType, ResponseChunk, StreamChatChunk};
use tracing::debug;

/// Status code on error frames that prompts sign-in for anonymous users
pub const PAYMENT_REQUIRED_STATUS: u16 = 402;

/// Lifecycle of one streamed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Placeholder created, no frame seen yet
    Idle,
    /// Frames arriving
    Streaming,
    /// Stream ended, final buffer flush in progress
    Finalizing,
    /// Chunk list is final
    Complete,
}

impl StreamState {
    /// Convert to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side effects invoked by the control-frame interceptor.
///
/// Implementations surface errors to the user and react to chunk
/// finalization; both callbacks default to no-ops so consumers override
/// only what they need.
pub trait StreamEvents {
    /// A server error frame arrived.
    ///
    /// `unauthenticated` is true when no signed-in user is present and the
    /// status is the payment-required code, in which case the consumer
    /// should show the sign-in variant of its error surface.
    fn on_error(
        &mut self,
        _status: Option<u16>,
        _status_text: &str,
        _service: Option<&str>,
        _unauthenticated: bool,
    ) {
    }

    /// A chunk of the given type was finalized with a display title.
    fn on_chunk_finalized(&mut self, _chunk_type: &ChunkType, _title: &str) {}
}

/// Event sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl StreamEvents for NoopEvents {}

/// Assembles one streamed response, frame by frame.
///
/// Owns the growing chunk list, the citation run buffer, and the stream
/// state machine. Error frames divert to the [`StreamEvents`] sink and do
/// not perturb the state machine; processing of the remaining frames in the
/// same read continues.
#[derive(Debug)]
pub struct StreamAssembler<E: StreamEvents> {
    chunks: Vec<ResponseChunk>,
    buffer: SourceBuffer,
    state: StreamState,
    events: E,
    authenticated: bool,
}

impl<E: StreamEvents> StreamAssembler<E> {
    /// Create an assembler for one stream-read loop.
    ///
    /// `authenticated` reflects whether a signed-in user is present; it only
    /// affects how payment-required error frames are reported.
    pub fn new(events: E, authenticated: bool) -> Self {
        Self {
            chunks: Vec::new(),
            buffer: SourceBuffer::new(),
            state: StreamState::Idle,
            events,
            authenticated,
        }
    }

    /// Current chunk list
    pub fn chunks(&self) -> &[ResponseChunk] {
        &self.chunks
    }

    /// Current stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether frames are still being consumed
    pub fn is_streaming(&self) -> bool {
        matches!(self.state, StreamState::Idle | StreamState::Streaming)
    }

    /// Parse one decoded text fragment and process every frame in it.
    ///
    /// A malformed fragment within the batch is skipped (logged by the
    /// parser); the rest of the batch is still processed.
    pub fn handle_text(&mut self, raw: &str) {
        for frame in parse_frames(raw) {
            self.handle_frame(frame);
        }
    }

    /// Process a single wire event.
    pub fn handle_frame(&mut self, frame: StreamChatChunk) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Streaming;
            debug!(state = %self.state, "first frame received");
        }

        match ControlFrame::classify(&frame) {
            ControlFrame::Error {
                status,
                status_text,
                service,
            } => {
                let unauthenticated =
                    !self.authenticated && status == Some(PAYMENT_REQUIRED_STATUS);
                self.events
                    .on_error(status, &status_text, service.as_deref(), unauthenticated);
            }
            ControlFrame::Finalize { chunk_type, title } => {
                self.chunks = finalize_chunk(&self.chunks, &chunk_type, &title);
                self.events.on_chunk_finalized(&chunk_type, &title);
            }
            ControlFrame::Content => {
                for ready in self.buffer.handle(frame.to_chunk()) {
                    self.chunks = merge_chunk(&self.chunks, &ready);
                }
            }
        }
    }

    /// End the stream: flush the pending citation run and seal the state.
    ///
    /// Returns the final chunk list. Safe to call once per stream; the
    /// buffer is empty afterwards so a second call is a no-op.
    pub fn finish(&mut self) -> &[ResponseChunk] {
        self.state = StreamState::Finalizing;
        for ready in self.buffer.flush() {
            self.chunks = merge_chunk(&self.chunks, &ready);
        }
        self.state = StreamState::Complete;
        debug!(chunk_count = self.chunks.len(), "stream complete");
        &self.chunks
    }

    /// Consume the assembler, yielding the chunk list
    pub fn into_chunks(self) -> Vec<ResponseChunk> {
        self.chunks
    }

    /// Consume the assembler, yielding the event sink
    pub fn into_events(self) -> E {
        self.events
    }
}

#[cfg(feature = "streaming")]
impl<E: StreamEvents> StreamAssembler<E> {
    /// Drive the assembler from a stream of decoded text fragments.
    ///
    /// Transport failures propagate to the caller without a final flush, so
    /// the caller's rollback path observes the failure. Dropping the
    /// returned future stops consumption. On clean end of stream the
    /// pending citation run is flushed and the final chunk list returned.
    pub async fn assemble_stream<S, T>(&mut self, mut stream: S) -> Result<&[ResponseChunk], T>
    where
        S: futures_util::Stream<Item = Result<String, T>> + Unpin,
    {
        use futures_util::StreamExt;

        while let Some(read) = stream.next().await {
            let text = read?;
            self.handle_text(&text);
        }
        Ok(self.finish())
    }
}
