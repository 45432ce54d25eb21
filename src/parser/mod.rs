//! Wire-frame parsing for the chunk stream.
//!
//! The backend writes JSON objects back-to-back into the response body with
//! no delimiter, so a single decoded read may contain zero, one, or many
//! frames. A small brace-depth scanner (string and escape aware, so braces
//! inside string values are handled correctly) carves the buffer back into
//! candidate objects; [`parse_frames`] decodes each candidate into a
//! [`StreamChatChunk`].
//!
//! Error isolation is per-fragment: a candidate that fails to decode is
//! logged and skipped, and scanning resumes at the next object start inside
//! it, so one malformed fragment never hides a well-formed neighbor. A
//! fragment straddling a network read boundary is one such candidate;
//! partial JSON is not buffered across reads.

use crate::StreamChatChunk;
use tracing::warn;

/// Byte length of the balanced top-level object at the start of `raw`,
/// which must begin with `{`. Tracks string state and backslash escapes so
/// braces inside string values do not end the object early. `None` when the
/// object never closes.
fn object_len(raw: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a decoded text buffer into candidate JSON object substrings.
///
/// Scans for top-level `{`..`}` spans. Bytes outside any top-level object,
/// and a trailing object that never closes, are emitted as their own
/// candidate so the parse step can report and skip them. This function does
/// not look inside a malformed candidate; the recovery that keeps one bad
/// fragment from hiding its neighbors lives in [`parse_frames`].
pub fn split_frames(raw: &str) -> Vec<&str> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos < raw.len() {
        let rest = &raw[pos..];
        let Some(open) = rest.find('{') else {
            if !rest.trim().is_empty() {
                frames.push(rest);
            }
            break;
        };
        // Anything between objects is malformed; surface it
        if !rest[..open].trim().is_empty() {
            frames.push(&rest[..open]);
        }
        match object_len(&rest[open..]) {
            Some(len) => {
                frames.push(&rest[open..open + len]);
                pos += open + len;
            }
            None => {
                frames.push(&rest[open..]);
                break;
            }
        }
    }

    frames
}

/// Parse a decoded text buffer into wire events.
///
/// Candidates that fail to decode are logged at `warn` and skipped. A
/// malformed candidate can swallow the frames behind it (an unterminated
/// string or brace hides every later object boundary from the scanner), so
/// after a failure the scan resumes at the next `{` inside the failed
/// candidate; the remaining frames of the same buffer are still returned.
pub fn parse_frames(raw: &str) -> Vec<StreamChatChunk> {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while pos < raw.len() {
        let rest = &raw[pos..];
        let Some(open) = rest.find('{') else {
            if !rest.trim().is_empty() {
                warn!(fragment_len = rest.len(), "skipping stray text between frames");
            }
            break;
        };
        if !rest[..open].trim().is_empty() {
            warn!(fragment_len = open, "skipping stray text between frames");
        }

        let candidate_start = pos + open;
        match object_len(&raw[candidate_start..]) {
            Some(len) => {
                let candidate = &raw[candidate_start..candidate_start + len];
                match serde_json::from_str(candidate) {
                    Ok(frame) => {
                        frames.push(frame);
                        pos = candidate_start + len;
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            fragment_len = len,
                            error = %err,
                            "skipping unparseable stream fragment"
                        );
                    }
                }
            }
            None => {
                warn!(
                    fragment_len = raw.len() - candidate_start,
                    "skipping unterminated stream fragment"
                );
            }
        }

        // Resume at the next object start inside the failed candidate
        match raw[candidate_start + 1..].find('{') {
            Some(next) => pos = candidate_start + 1 + next,
            None => break,
        }
    }

    frames
}
