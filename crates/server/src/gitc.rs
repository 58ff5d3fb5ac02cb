// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git subprocess client for the vault repository.
//!
//! Every operation shells out to `git -C <vault>` with a wall-clock timeout
//! and `GIT_TERMINAL_PROMPT=0` so nothing can block on credentials.  When
//! the mirror is disabled the client is never constructed; callers gate on
//! configuration before reaching here.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::process::Command;
use tracing::debug;

pub struct GitClient {
    vault_path: PathBuf,
    timeout: Duration,
}

impl GitClient {
    pub fn new(vault_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { vault_path: vault_path.into(), timeout }
    }

    /// Clone the repository into the vault if `.git` is missing, then set
    /// the commit author.
    pub async fn initialize(
        &self,
        repo_url: &str,
        user_name: &str,
        user_email: &str,
    ) -> anyhow::Result<()> {
        if !self.vault_path.join(".git").exists() {
            let vault = self
                .vault_path
                .to_str()
                .context("vault path is not valid UTF-8")?
                .to_owned();
            debug!(repo_url = %repo_url, vault_path = %vault, "cloning vault from repository");
            self.run_in(None, &["clone", repo_url, vault.as_str()])
                .await
                .context("git clone failed")?;
        }
        self.run(&["config", "user.name", user_name]).await?;
        self.run(&["config", "user.email", user_email]).await?;
        Ok(())
    }

    pub async fn pull(&self) -> anyhow::Result<()> {
        self.run(&["pull"]).await.context("git pull failed")?;
        debug!("git pull completed");
        Ok(())
    }

    /// Changed files (modified, added, deleted, untracked), vault-relative.
    pub async fn changed_files(&self) -> anyhow::Result<Vec<String>> {
        let output = self.run(&["status", "--porcelain"]).await?;
        Ok(output
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| {
                let path = &line[3..];
                // Renames report "old -> new"; the new path is what we stage.
                match path.split_once(" -> ") {
                    Some((_, new)) => new.to_owned(),
                    None => path.to_owned(),
                }
            })
            .collect())
    }

    /// Stage the given paths and commit.
    pub async fn commit(&self, message: &str, paths: &[String]) -> anyhow::Result<()> {
        let mut add_args = vec!["add".to_owned(), "--".to_owned()];
        add_args.extend(paths.iter().cloned());
        let add_refs: Vec<&str> = add_args.iter().map(String::as_str).collect();
        self.run(&add_refs).await.context("git add failed")?;
        self.run(&["commit", "-m", message]).await.context("git commit failed")?;
        debug!(files = paths.len(), "git commit completed");
        Ok(())
    }

    pub async fn head_commit(&self) -> anyhow::Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"]).await?.trim().to_owned())
    }

    pub async fn push(&self) -> anyhow::Result<()> {
        // HEAD refspec: works before the first push creates an upstream.
        self.run(&["push", "origin", "HEAD"]).await.context("git push failed")?;
        debug!("git push completed");
        Ok(())
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        self.run_in(Some(&self.vault_path), args).await
    }

    async fn run_in(&self, cwd: Option<&PathBuf>, args: &[&str]) -> anyhow::Result<String> {
        let mut cmd = Command::new("git");
        if let Some(cwd) = cwd {
            cmd.arg("-C").arg(cwd);
        }
        cmd.args(args).env("GIT_TERMINAL_PROMPT", "0").kill_on_drop(true);

        let subcommand = args.first().copied().unwrap_or_default();
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "git {subcommand} timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("failed to run git {subcommand}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {subcommand} failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
#[path = "gitc_tests.rs"]
mod tests;
