// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[derive(Serialize)]
struct Meta {
    id: String,
    processed: bool,
}

#[test]
fn format_then_split_round_trips() {
    let meta = Meta { id: "2025-12-21T14:30:00Z-iphone".to_owned(), processed: false };
    let doc = format_document(&meta, "Raw capture text").expect("format");

    assert!(doc.starts_with("---\n"));
    assert!(doc.ends_with("Raw capture text\n"));

    let (frontmatter, body) = split(&doc);
    let frontmatter = frontmatter.expect("frontmatter present");
    assert_eq!(frontmatter["id"].as_str(), Some("2025-12-21T14:30:00Z-iphone"));
    assert_eq!(frontmatter["processed"].as_bool(), Some(false));
    assert_eq!(body, "Raw capture text\n");
}

#[test]
fn split_without_frontmatter_returns_full_body() {
    let content = "# Just markdown\n\nNo metadata here.\n";
    let (frontmatter, body) = split(content);
    assert!(frontmatter.is_none());
    assert_eq!(body, content);
}

#[test]
fn split_with_unterminated_block_returns_full_body() {
    let content = "---\nid: broken\nno closing fence\n";
    let (frontmatter, body) = split(content);
    assert!(frontmatter.is_none());
    assert_eq!(body, content);
}

#[test]
fn split_with_invalid_yaml_degrades_to_plain_markdown() {
    let content = "---\n: [unbalanced\n---\n\nbody\n";
    let (frontmatter, body) = split(content);
    assert!(frontmatter.is_none());
    assert_eq!(body, content);
}

#[test]
fn split_strips_blank_line_after_fence() {
    let content = "---\nname: review\n---\n\nPrompt body here\n";
    let (frontmatter, body) = split(content);
    assert!(frontmatter.is_some());
    assert_eq!(body, "Prompt body here\n");
}
