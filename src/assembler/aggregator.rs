//! Buffering and collapsing of consecutive citation chunks.

use crate::{
    ChunkType, ResponseChunk, SOURCES_CLOSE_TAG, SOURCES_OPEN_TAG, SOURCE_MARKER_CLOSE,
    SOURCE_MARKER_OPEN,
};
use tracing::debug;

/// Minimum run length at which consecutive source-like chunks are collapsed
/// into one composite `<sources>` chunk. Shorter runs pass through
/// individually.
pub const MIN_CONSECUTIVE_SOURCES_TO_COMBINE: usize = 3;

/// Render one citation chunk to the text used in composites and groups.
///
/// Web search citations have the `【`/`】` markers stripped. Course/space
/// citations carrying `bbox` or `source` metadata get it spliced as
/// `, bbox: <v>` / `, source: <v>` immediately before the closing `】`.
pub fn render_source_piece(chunk: &ResponseChunk) -> String {
    if chunk.chunk_type == ChunkType::WebSearchSource {
        return chunk
            .content
            .chars()
            .filter(|c| *c != SOURCE_MARKER_OPEN && *c != SOURCE_MARKER_CLOSE)
            .collect();
    }

    let mut splice = String::new();
    if let Some(bbox) = &chunk.bbox {
        splice.push_str(", bbox: ");
        splice.push_str(&render_meta_value(bbox));
    }
    if let Some(source) = &chunk.source {
        splice.push_str(", source: ");
        splice.push_str(&render_meta_value(source));
    }
    if splice.is_empty() {
        return chunk.content.clone();
    }

    let mut piece = chunk.content.clone();
    match piece.rfind(SOURCE_MARKER_CLOSE) {
        Some(idx) => piece.insert_str(idx, &splice),
        None => piece.push_str(&splice),
    }
    piece
}

/// Render a metadata value without JSON string quoting
fn render_meta_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Transient per-stream buffer of pending citation chunks.
///
/// Source-like chunks are held back while a run is in progress; the first
/// non-source chunk (or end of stream) flushes the run. A run of at least
/// [`MIN_CONSECUTIVE_SOURCES_TO_COMBINE`] collapses into a single closed
/// `response` chunk wrapped in `<sources>` tags; a shorter run is released
/// unmodified. Applying this buffer to a fully materialized chunk list
/// yields the same output as applying it live, chunk by chunk.
#[derive(Debug, Default)]
pub struct SourceBuffer {
    pending: Vec<ResponseChunk>,
}

impl SourceBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one content chunk through the buffer.
    ///
    /// Returns the chunks ready for the merge path: nothing while a source
    /// run is accumulating, or the flushed run followed by the triggering
    /// chunk itself.
    pub fn handle(&mut self, chunk: ResponseChunk) -> Vec<ResponseChunk> {
        if chunk.chunk_type.is_source_like() {
            self.pending.push(chunk);
            return Vec::new();
        }
        let mut out = self.flush();
        out.push(chunk);
        out
    }

    /// Flush the pending run.
    ///
    /// Collapses it into one composite chunk when long enough, otherwise
    /// releases the buffered chunks unmodified. The buffer is empty after
    /// this returns.
    pub fn flush(&mut self) -> Vec<ResponseChunk> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let run = std::mem::take(&mut self.pending);
        if run.len() < MIN_CONSECUTIVE_SOURCES_TO_COMBINE {
            return run;
        }

        let mut content = String::from(SOURCES_OPEN_TAG);
        for piece in &run {
            content.push_str(&render_source_piece(piece));
        }
        content.push_str(SOURCES_CLOSE_TAG);
        debug!(run_len = run.len(), "collapsed citation run into composite chunk");

        // Closed on synthesis: composites never merge with later deltas
        vec![ResponseChunk::new(ChunkType::Response, content).with_done()]
    }

    /// Number of chunks in the pending run
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no run is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
