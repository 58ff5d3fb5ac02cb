// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Markdown documents with a YAML frontmatter block.
//!
//! Wire shape: `---\n<yaml>\n---\n\n<body>\n`. Captures and command-run
//! logs are written through [`format_document`]; command files are read
//! through [`split`].

use anyhow::Context;
use serde::Serialize;

/// Render a frontmatter document from serializable metadata plus a body.
pub fn format_document<M: Serialize>(metadata: &M, body: &str) -> anyhow::Result<String> {
    let yaml = serde_yaml::to_string(metadata).context("serializing frontmatter")?;
    Ok(format!("---\n{yaml}---\n\n{body}\n"))
}

/// Split a document into its frontmatter mapping and body.
///
/// Documents without a leading `---` block yield `None` and the full text
/// as body. A malformed YAML block also falls back to the full text, so a
/// broken file degrades to plain markdown instead of an error.
pub fn split(content: &str) -> (Option<serde_yaml::Value>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, content);
    };
    let yaml = &rest[..end + 1];
    let mut body = &rest[end + "\n---".len()..];
    body = body.strip_prefix('\n').unwrap_or(body);
    body = body.strip_prefix('\n').unwrap_or(body);

    match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(value) if value.is_mapping() => (Some(value), body),
        _ => (None, content),
    }
}

#[cfg(test)]
#[path = "frontmatter_tests.rs"]
mod tests;
