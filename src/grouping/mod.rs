//! Display grouping of persisted chunk lists.
//!
//! Once a stream is complete (or when history is loaded from the server),
//! the full chunk list is regrouped for rendering: the same citation-run
//! collapsing used live is re-run over the static list, then adjacent
//! concatenable chunks are folded into one display group. Both passes are
//! pure and idempotent, so callers can re-run them on every render.

use crate::assembler::{render_source_piece, SourceBuffer};
use crate::{ChunkType, ResponseChunk};

/// Web search citation kinds that may join a display group
pub const CONCATENABLE_WEB_SOURCE_KINDS: [&str; 6] =
    ["webpage", "pdf", "pptx", "arxiv", "docx", "text"];

/// Whether a chunk may be folded into an adjacent display group.
///
/// Prose and course/space citations always qualify; web search citations
/// qualify only when their nested `content_dict.type` is on the allow-list.
/// Everything else (quizzes, diagrams, unknown types) renders standalone.
pub fn is_concatenable(chunk: &ResponseChunk) -> bool {
    match &chunk.chunk_type {
        ChunkType::Response | ChunkType::Source | ChunkType::SpaceSource => true,
        ChunkType::WebSearchSource => chunk
            .content_dict
            .as_ref()
            .and_then(|dict| dict.kind.as_deref())
            .map(|kind| CONCATENABLE_WEB_SOURCE_KINDS.contains(&kind))
            .unwrap_or(false),
        _ => false,
    }
}

/// Re-run citation-run collapsing over a static chunk list.
///
/// Feeds the list through the same [`SourceBuffer`] the live pipeline uses,
/// so a persisted list and a live stream collapse identically.
pub fn collapse_source_runs(chunks: &[ResponseChunk]) -> Vec<ResponseChunk> {
    let mut buffer = SourceBuffer::new();
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        out.extend(buffer.handle(chunk.clone()));
    }
    out.extend(buffer.flush());
    out
}

/// Group a complete chunk list for rendering.
///
/// After the collapse pre-pass, a chunk joins the previous group by textual
/// concatenation into that group's last chunk when both sides are
/// concatenable; otherwise it starts a new single-chunk group. Relative
/// order is preserved; no chunk is dropped or duplicated. Citation text is
/// rendered with the same bracket-splicing rule the composite builder uses.
pub fn group_for_display(chunks: &[ResponseChunk]) -> Vec<Vec<ResponseChunk>> {
    let mut groups: Vec<Vec<ResponseChunk>> = Vec::new();

    for chunk in collapse_source_runs(chunks) {
        if is_concatenable(&chunk) {
            if let Some(target) = groups.last_mut().and_then(|group| group.last_mut()) {
                if is_concatenable(target) {
                    target.content.push_str(&render_piece(&chunk));
                    continue;
                }
            }
        }
        groups.push(vec![chunk]);
    }

    groups
}

/// Text a chunk contributes when folded into a group
fn render_piece(chunk: &ResponseChunk) -> String {
    if chunk.chunk_type.is_source_like() {
        render_source_piece(chunk)
    } else {
        chunk.content.clone()
    }
}

#[cfg(test)]
mod tests;
