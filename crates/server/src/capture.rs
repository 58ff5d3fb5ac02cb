// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capture ingestion: one self-contained markdown file per thought.
//!
//! Ingest is non-blocking for the client: generate the dump ID, optionally
//! ask the runner for a short title, write the frontmatter document
//! atomically, and return.  The mirror commit happens afterwards as a
//! background task owned by the HTTP boundary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ConfigManager;
use crate::runner;
use crate::sdk::SdkConnector;

/// Incoming capture payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureRequest {
    pub text: String,
    pub source: CaptureSource,
    pub input: CaptureInput,
    pub captured_at: DateTime<Utc>,
    pub context: CaptureContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Iphone,
    Ipad,
    Mac,
}

impl CaptureSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iphone => "iphone",
            Self::Ipad => "ipad",
            Self::Mac => "mac",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureInput {
    Voice,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureContext {
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of a successful ingest.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub dump_id: String,
    pub relative_path: String,
}

#[derive(Serialize)]
struct CaptureFrontmatter<'a> {
    id: &'a str,
    captured_at: String,
    source: &'a str,
    input: CaptureInput,
    processed: bool,
    context: &'a CaptureContext,
}

/// Writes capture files into the configured inbox folder.
pub struct CaptureIngestor {
    config: Arc<ConfigManager>,
    connector: Arc<dyn SdkConnector>,
    vault_mutex: Arc<Mutex<()>>,
}

impl CaptureIngestor {
    pub fn new(
        config: Arc<ConfigManager>,
        connector: Arc<dyn SdkConnector>,
        vault_mutex: Arc<Mutex<()>>,
    ) -> Self {
        Self { config, connector, vault_mutex }
    }

    /// `{ISO8601 timestamp}-{source}`, e.g. `2025-12-21T14:30:00Z-iphone`.
    pub fn dump_id(captured_at: DateTime<Utc>, source: CaptureSource) -> String {
        format!("{}-{}", captured_at.format("%Y-%m-%dT%H:%M:%SZ"), source.as_str())
    }

    /// Write the capture file. The file exists on disk when this returns.
    pub async fn ingest(&self, request: &CaptureRequest) -> anyhow::Result<CaptureOutcome> {
        let config = self.config.snapshot().await;
        let dump_id = Self::dump_id(request.captured_at, request.source);
        info!(dump_id = %dump_id, "capture received");

        let title = if config.capture_file_pattern.contains("{title}") {
            let title = runner::generate_title(
                self.connector.as_ref(),
                &request.text,
                config.title_timeout(),
            )
            .await;
            match title {
                Some(ref title) => info!(dump_id = %dump_id, title = %title, "generated title"),
                None => warn!(dump_id = %dump_id, "title generation failed, omitting title"),
            }
            title
        } else {
            None
        };

        let file_name = capture_file_name(
            &config.capture_file_pattern,
            request.captured_at,
            request.source,
            title.as_deref(),
        );
        let relative_path = format!("{}/{}", config.inbox_folder.trim_end_matches('/'), file_name);
        let absolute: PathBuf = config.vault_path.join(&relative_path);

        let frontmatter = CaptureFrontmatter {
            id: &dump_id,
            captured_at: request.captured_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            source: request.source.as_str(),
            input: request.input,
            processed: false,
            context: &request.context,
        };
        let content = crate::frontmatter::format_document(&frontmatter, request.text.trim_end())?;

        // Vault write: serialize against the mirror and other writers.
        let _guard = self.vault_mutex.lock().await;
        let target = absolute.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, content.as_bytes()))
            .await
            .context("capture write task failed")??;

        info!(dump_id = %dump_id, path = %relative_path, "capture saved locally");
        Ok(CaptureOutcome { dump_id, relative_path })
    }
}

/// Fill the capture filename pattern.
///
/// `{date}` is the capture timestamp with `:` flattened for the filesystem,
/// `{source}` the device, `{title}` the generated slug (dropped, together
/// with its separator, when absent).
fn capture_file_name(
    pattern: &str,
    captured_at: DateTime<Utc>,
    source: CaptureSource,
    title: Option<&str>,
) -> String {
    let date = captured_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut name = pattern
        .replace("{date}", &date)
        .replace("{source}", source.as_str());
    name = match title.map(slugify).filter(|slug| !slug.is_empty()) {
        Some(slug) => name.replace("{title}", &slug),
        None => name.replace("-{title}", "").replace("{title}", ""),
    };
    if name.ends_with(".md") {
        name
    } else {
        format!("{name}.md")
    }
}

/// Filesystem-safe slug: lowercase, hyphen-separated, ascii-only.
fn slugify(title: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let strip = PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern, cannot fail
        regex::Regex::new(r"[^a-z0-9-]+").unwrap()
    });
    let lowered = title.trim().to_lowercase().replace([' ', '_'], "-");
    let stripped = strip.replace_all(&lowered, "");
    let mut slug = String::with_capacity(stripped.len());
    let mut last_hyphen = false;
    for ch in stripped.chars() {
        if ch == '-' {
            if !last_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            last_hyphen = true;
        } else {
            slug.push(ch);
            last_hyphen = false;
        }
    }
    slug.trim_end_matches('-').to_owned()
}

/// Write-temp-then-rename so readers never observe a partial capture.
fn atomic_write(path: &std::path::Path, contents: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;

    let parent = path.parent().context("capture path has no parent")?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("md.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    std::fs::File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
