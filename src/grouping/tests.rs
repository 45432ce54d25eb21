//! Tests for display grouping

use super::*;
use crate::{ContentDict, ResponseChunk};
use serde_json::json;

fn response(content: &str) -> ResponseChunk {
    ResponseChunk::new("response", content)
}

fn source(content: &str) -> ResponseChunk {
    ResponseChunk::new("source", content)
}

fn web_source(content: &str, kind: &str) -> ResponseChunk {
    let mut chunk = ResponseChunk::new("web_search_source", content);
    chunk.content_dict = Some(ContentDict {
        kind: Some(kind.to_string()),
        extra: serde_json::Map::new(),
    });
    chunk
}

fn flatten(groups: &[Vec<ResponseChunk>]) -> Vec<ResponseChunk> {
    groups.iter().flatten().cloned().collect()
}

#[test]
fn test_collapse_matches_live_aggregation() {
    let chunks = vec![
        source("【a】"),
        source("【b】"),
        source("【c】"),
        response("Answer."),
    ];
    let collapsed = collapse_source_runs(&chunks);
    assert_eq!(collapsed.len(), 2);
    assert_eq!(collapsed[0].content, "<sources>【a】【b】【c】</sources>");
    assert_eq!(collapsed[1].content, "Answer.");
}

#[test]
fn test_collapse_short_run_passes_through() {
    let chunks = vec![source("【a】"), response("x"), source("【b】")];
    let collapsed = collapse_source_runs(&chunks);
    assert_eq!(collapsed.len(), 3);
    assert_eq!(collapsed[0], chunks[0]);
    assert_eq!(collapsed[2], chunks[2]);
}

#[test]
fn test_adjacent_concatenable_chunks_share_a_group() {
    let chunks = vec![response("The answer "), source("【p2†notes】")];
    let groups = group_for_display(&chunks);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 1);
    assert_eq!(groups[0][0].content, "The answer 【p2†notes】");
}

#[test]
fn test_non_concatenable_chunk_starts_new_group() {
    let chunks = vec![
        response("Intro"),
        ResponseChunk::new("quiz", ""),
        response("Outro"),
    ];
    let groups = group_for_display(&chunks);
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[1][0].chunk_type, crate::ChunkType::Quiz);
}

#[test]
fn test_web_source_allow_list() {
    // pdf is allowed: joins the prose group
    let groups = group_for_display(&[response("See "), web_source("【ref】", "pdf")]);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0][0].content, "See ref");

    // video is not: renders standalone
    let groups = group_for_display(&[response("See "), web_source("【ref】", "video")]);
    assert_eq!(groups.len(), 2);

    // missing content_dict is not concatenable either
    let bare = ResponseChunk::new("web_search_source", "【ref】");
    let groups = group_for_display(&[response("See "), bare]);
    assert_eq!(groups.len(), 2);
}

#[test]
fn test_group_splices_citation_metadata() {
    let cited = source("【p3†slides】").with_bbox(json!([1, 2, 3, 4]));
    let groups = group_for_display(&[response("Proof: "), cited]);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0][0].content, "Proof: 【p3†slides, bbox: [1,2,3,4]】");
}

#[test]
fn test_long_run_in_history_collapses_before_grouping() {
    let chunks = vec![
        response("Intro "),
        source("【a】"),
        source("【b】"),
        source("【c】"),
        response(" outro"),
    ];
    let groups = group_for_display(&chunks);
    // Composite is done, hence still concatenable text joined into the group
    assert_eq!(groups.len(), 1);
    assert_eq!(
        groups[0][0].content,
        "Intro <sources>【a】【b】【c】</sources> outro"
    );
}

#[test]
fn test_order_preserved_nothing_dropped() {
    let chunks = vec![
        ResponseChunk::new("whiteboard", "w"),
        response("a"),
        ResponseChunk::new("navigate", "/page/3"),
        response("b"),
    ];
    let groups = group_for_display(&chunks);
    let flat = flatten(&groups);
    assert_eq!(flat.len(), 4);
    assert_eq!(flat[0].chunk_type, crate::ChunkType::Whiteboard);
    assert_eq!(flat[2].chunk_type, crate::ChunkType::Navigate);
    assert_eq!(flat[3].content, "b");
}

#[test]
fn test_grouping_is_idempotent() {
    let inputs = vec![
        // mixed prose, citations (short and long runs), standalone payloads
        vec![
            response("One "),
            source("【a】"),
            ResponseChunk::new("quiz", ""),
            source("【b】"),
            source("【c】"),
            source("【d】"),
            response(" tail"),
        ],
        vec![source("【solo】")],
        vec![ResponseChunk::new("flashcards", "")],
        vec![],
    ];

    for chunks in inputs {
        let once = group_for_display(&chunks);
        let twice = group_for_display(&flatten(&once));
        assert_eq!(once, twice);
    }
}

#[test]
fn test_grouping_is_pure() {
    let chunks = vec![response("a"), source("【b】")];
    let before = chunks.clone();
    let _ = group_for_display(&chunks);
    assert_eq!(chunks, before);
}

#[test]
fn test_empty_input_yields_no_groups() {
    assert!(group_for_display(&[]).is_empty());
}
