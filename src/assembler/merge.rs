//! Append-or-merge engine over an ordered chunk list.

use crate::{ChunkType, ResponseChunk};

/// Fold one incoming chunk into an ordered chunk list.
///
/// Merges (concatenates content) into the list's last element when it has
/// the same type and neither side is done; otherwise appends the incoming
/// chunk as a new element. Done chunks never merge in either direction:
/// they are closed to further deltas, and a closed incoming chunk (such as
/// a synthesized `<sources>` composite) must stay a standalone element.
///
/// Pure transition: the input slice is never mutated, callers compare
/// values to detect change.
pub fn merge_chunk(chunks: &[ResponseChunk], incoming: &ResponseChunk) -> Vec<ResponseChunk> {
    let mut next = chunks.to_vec();
    match next.last_mut() {
        Some(last)
            if last.chunk_type == incoming.chunk_type
                && !last.is_done()
                && !incoming.is_done() =>
        {
            last.content.push_str(&incoming.content);
        }
        _ => next.push(incoming.clone()),
    }
    next
}

/// Close the most recent open chunk of the given type and attach a title.
///
/// Scans from the tail; if no open chunk of that type exists, appends a new
/// empty, already-done chunk carrying just the title.
pub fn finalize_chunk(
    chunks: &[ResponseChunk],
    chunk_type: &ChunkType,
    title: &str,
) -> Vec<ResponseChunk> {
    let mut next = chunks.to_vec();
    match next
        .iter_mut()
        .rev()
        .find(|c| &c.chunk_type == chunk_type && !c.is_done())
    {
        Some(open) => {
            open.done = Some(true);
            open.title = Some(title.to_string());
        }
        None => {
            next.push(
                ResponseChunk::new(chunk_type.clone(), "")
                    .with_done()
                    .with_title(title),
            );
        }
    }
    next
}
