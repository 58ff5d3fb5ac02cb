// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named commands stored as markdown files in the vault.
//!
//! A command is a frontmatter-prefixed markdown file under
//! `<vault>/.claude/commands/`, addressed by file stem anywhere in the
//! subtree. The body (frontmatter stripped) becomes the runner prompt.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::frontmatter;

/// Resolver for vault commands.
pub struct CommandCatalog {
    vault_path: PathBuf,
}

impl CommandCatalog {
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        Self { vault_path: vault_path.into() }
    }

    fn commands_dir(&self) -> PathBuf {
        self.vault_path.join(".claude").join("commands")
    }

    /// Resolve a command name to its prompt body, or `None` when unknown.
    ///
    /// The scan runs on the blocking pool; command trees are small but this
    /// keeps directory walks off the event loop.
    pub async fn resolve(&self, name: &str) -> anyhow::Result<Option<String>> {
        let dir = self.commands_dir();
        let target = name.to_owned();
        let found = tokio::task::spawn_blocking(move || find_command_file(&dir, &target))
            .await
            .context("command scan task failed")?;

        let Some(path) = found else {
            warn!(command_name = %name, "command not found");
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading command file {}", path.display()))?;
        let (_, body) = frontmatter::split(&content);
        Ok(Some(body.trim().to_owned()))
    }
}

/// Depth-first search for `<name>.md` under `dir`.
fn find_command_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md")
            && path.file_stem().and_then(|s| s.to_str()) == Some(name)
        {
            return Some(path);
        }
    }
    subdirs.into_iter().find_map(|subdir| find_command_file(&subdir, name))
}

#[cfg(test)]
#[path = "command_catalog_tests.rs"]
mod tests;
