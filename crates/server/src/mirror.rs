// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vault mirror coordinator: the single sequencer for vault-mutating work.
//!
//! Every entry point takes the vault mutex, so capture commits, post-run
//! syncs, and the periodic pull never race.  Post-run sync is best-effort
//! throughout: each step records its status, failures accumulate, and a
//! single aggregated error is raised at the end so the caller can log one
//! line without losing any step.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AppConfig, ConfigManager};
use crate::gitc::GitClient;
use crate::tracker::BackgroundTaskTracker;

/// Run metadata handed to the post-run sync.
#[derive(Debug, Clone)]
pub struct RunSyncMeta {
    pub command_name: String,
    pub run_id: Option<String>,
    pub status: String,
    pub scheduled: bool,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
}

/// Per-step status of one post-run sync, recorded into the run log.
#[derive(Debug, Clone, Serialize)]
pub struct GitSyncSummary {
    pub enabled: bool,
    pub pull_status: String,
    pub pull_error: Option<String>,
    pub changed_files_count: usize,
    pub vault_commit_status: String,
    pub vault_commit_hash: Option<String>,
    pub vault_commit_error: Option<String>,
    pub push_status: String,
    pub push_error: Option<String>,
}

impl GitSyncSummary {
    fn disabled() -> Self {
        Self {
            enabled: false,
            pull_status: "skipped".to_owned(),
            pull_error: None,
            changed_files_count: 0,
            vault_commit_status: "skipped".to_owned(),
            vault_commit_hash: None,
            vault_commit_error: None,
            push_status: "skipped".to_owned(),
            push_error: None,
        }
    }
}

/// Coordinator owning the pull → mutate → commit → push sequence.
pub struct VaultMirror {
    config: Arc<ConfigManager>,
    vault_mutex: Arc<Mutex<()>>,
}

impl VaultMirror {
    pub fn new(config: Arc<ConfigManager>, vault_mutex: Arc<Mutex<()>>) -> Self {
        Self { config, vault_mutex }
    }

    fn git(&self, config: &AppConfig) -> GitClient {
        GitClient::new(&config.vault_path, config.git_timeout())
    }

    /// Clone the vault and set the commit author at startup.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let config = self.config.snapshot().await;
        if !config.mirror.enabled {
            info!("mirror disabled, running in local-only mode");
            return Ok(());
        }
        let repo_url = config
            .mirror
            .repo_url
            .as_deref()
            .context("mirror enabled but repo_url not configured")?;
        self.git(&config)
            .initialize(repo_url, &config.mirror.user_name, &config.mirror.user_email)
            .await
    }

    /// Commit and push everything changed after a capture. No-op when the
    /// mirror is disabled or nothing changed.
    pub async fn sync_capture(&self) -> anyhow::Result<()> {
        let config = self.config.snapshot().await;
        if !config.mirror.enabled {
            return Ok(());
        }
        let _guard = self.vault_mutex.lock().await;

        let git = self.git(&config);
        let changed = git.changed_files().await?;
        if changed.is_empty() {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        git.commit(&format!("Agent: Auto-commit at {timestamp}"), &changed).await?;
        git.push().await?;
        info!(files = changed.len(), "auto-commit and push completed");
        Ok(())
    }

    /// Post-run sync: pull, commit changes, write and commit the run log,
    /// push once.  Attempts every step; raises one aggregated error if any
    /// step failed.
    pub async fn sync_command_run(&self, meta: &RunSyncMeta) -> anyhow::Result<()> {
        let config = self.config.snapshot().await;
        if !config.mirror.enabled {
            return Ok(());
        }
        let _guard = self.vault_mutex.lock().await;

        let git = self.git(&config);
        let timestamp = Utc::now();
        let mut errors: Vec<anyhow::Error> = Vec::new();
        let mut summary = GitSyncSummary::disabled();
        summary.enabled = true;

        match git.pull().await {
            Ok(()) => summary.pull_status = "success".to_owned(),
            Err(e) => {
                summary.pull_status = "failed".to_owned();
                summary.pull_error = Some(format!("{e:#}"));
                error!(
                    command_name = %meta.command_name,
                    run_id = ?meta.run_id,
                    err = %format!("{e:#}"),
                    "git pull failed after command run"
                );
                errors.push(e);
            }
        }

        let changed = match git.changed_files().await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(err = %format!("{e:#}"), "failed to list changed files");
                errors.push(e);
                Vec::new()
            }
        };
        summary.changed_files_count = changed.len();

        if changed.is_empty() {
            summary.vault_commit_status = "skipped_no_changes".to_owned();
        } else {
            let message = build_commit_message("Command", meta, timestamp);
            match git.commit(&message, &changed).await {
                Ok(()) => {
                    summary.vault_commit_status = "committed".to_owned();
                    summary.vault_commit_hash = git.head_commit().await.ok();
                }
                Err(e) => {
                    summary.vault_commit_status = "failed".to_owned();
                    summary.vault_commit_error = Some(format!("{e:#}"));
                    error!(
                        command_name = %meta.command_name,
                        run_id = ?meta.run_id,
                        err = %format!("{e:#}"),
                        "git commit failed after command run"
                    );
                    errors.push(e);
                }
            }
        }
        summary.push_status = "pending".to_owned();

        // The run log is a second staged file, committed separately.
        let log_path = match self.write_run_log(&config, meta, &summary, timestamp).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!(
                    command_name = %meta.command_name,
                    run_id = ?meta.run_id,
                    err = %format!("{e:#}"),
                    "failed to write command run log"
                );
                errors.push(e);
                None
            }
        };

        if let Some(log_path) = log_path {
            let message = build_commit_message("Command log", meta, timestamp);
            if let Err(e) = git.commit(&message, &[log_path]).await {
                error!(
                    command_name = %meta.command_name,
                    run_id = ?meta.run_id,
                    err = %format!("{e:#}"),
                    "git commit failed for command run log"
                );
                errors.push(e);
            }
        }

        // One push covers both commits.
        if let Err(e) = git.push().await {
            error!(
                command_name = %meta.command_name,
                run_id = ?meta.run_id,
                err = %format!("{e:#}"),
                "git push failed after command run"
            );
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "post-run sync encountered {} error(s) for command {}",
                errors.len(),
                meta.command_name
            )
        }
    }

    /// Pull the remote state. Used by the periodic pull loop.
    pub async fn pull(&self) -> anyhow::Result<()> {
        let config = self.config.snapshot().await;
        if !config.mirror.enabled {
            return Ok(());
        }
        let _guard = self.vault_mutex.lock().await;
        self.git(&config).pull().await
    }

    /// Write the human-readable run log under the logs folder; returns the
    /// vault-relative path for staging.
    async fn write_run_log(
        &self,
        config: &AppConfig,
        meta: &RunSyncMeta,
        summary: &GitSyncSummary,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<String> {
        let file_name = format!(
            "{}-{}.md",
            timestamp.format("%Y-%m-%dT%H-%M-%SZ"),
            meta.command_name
        );
        let relative = format!("{}/{}", config.logs_folder.trim_end_matches('/'), file_name);
        let absolute = config.vault_path.join(&relative);

        let content = build_run_log(meta, summary, timestamp)?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, content)
            .await
            .with_context(|| format!("writing run log {}", absolute.display()))?;
        Ok(relative)
    }
}

/// `"<prefix>: <name> (<scheduled|manual>) at <UTC ts> [run_id=...]"`
fn build_commit_message(prefix: &str, meta: &RunSyncMeta, timestamp: DateTime<Utc>) -> String {
    let scheduled = if meta.scheduled { "scheduled" } else { "manual" };
    let stamp = timestamp.format("%Y-%m-%dT%H:%M:%SZ");
    let mut message = format!("{prefix}: {} ({scheduled}) at {stamp}", meta.command_name);
    if let Some(ref run_id) = meta.run_id {
        message.push_str(&format!(" [run_id={run_id}]"));
    }
    message
}

/// Markdown-with-frontmatter run log.
fn build_run_log(
    meta: &RunSyncMeta,
    summary: &GitSyncSummary,
    timestamp: DateTime<Utc>,
) -> anyhow::Result<String> {
    #[derive(Serialize)]
    struct LogFrontmatter<'a> {
        command: &'a str,
        run_id: Option<&'a str>,
        status: &'a str,
        scheduled: bool,
        timestamp: String,
    }

    let frontmatter = LogFrontmatter {
        command: &meta.command_name,
        run_id: meta.run_id.as_deref(),
        status: &meta.status,
        scheduled: meta.scheduled,
        timestamp: timestamp.to_rfc3339(),
    };

    let duration = meta
        .duration_ms
        .map(|ms| format!("{:.1}", ms as f64 / 1000.0))
        .unwrap_or_else(|| "n/a".to_owned());
    let cost = meta
        .cost_usd
        .map(|c| format!("{c:.4}"))
        .unwrap_or_else(|| "n/a".to_owned());
    let error = meta.error.as_deref().unwrap_or("none");

    let mut body = format!(
        "# Command Run: {name}\n\n\
         - Command: {name}\n\
         - Status: {status}\n\
         - Run ID: {run_id}\n\
         - Scheduled: {scheduled}\n\
         - Duration (s): {duration}\n\
         - Cost (USD): {cost}\n\
         - Error: {error}\n\n\
         ## Git Sync\n\n",
        name = meta.command_name,
        status = meta.status,
        run_id = meta.run_id.as_deref().unwrap_or("n/a"),
        scheduled = meta.scheduled,
    );
    body.push_str(&format!("- Pull: {}\n", summary.pull_status));
    if let Some(ref pull_error) = summary.pull_error {
        body.push_str(&format!("- Pull Error: {pull_error}\n"));
    }
    body.push_str(&format!("- Vault Commit: {}", summary.vault_commit_status));
    if let Some(ref hash) = summary.vault_commit_hash {
        body.push_str(&format!(" ({hash})"));
    }
    body.push('\n');
    if let Some(ref commit_error) = summary.vault_commit_error {
        body.push_str(&format!("- Vault Commit Error: {commit_error}\n"));
    }
    body.push_str(&format!("- Push: {}\n", summary.push_status));
    body.push_str(&format!("- Changed Files: {}\n", summary.changed_files_count));

    crate::frontmatter::format_document(&frontmatter, body.trim_end())
}

/// Background refresh of the remote state at the configured cadence.
pub fn spawn_pull_loop(
    mirror: Arc<VaultMirror>,
    tracker: Arc<BackgroundTaskTracker>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval = mirror.config.snapshot().await.pull_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval.max(Duration::from_secs(1))) => {}
            }
            match mirror.pull().await {
                Ok(()) => tracker.record_success("periodic_pull").await,
                Err(e) => tracker.record_failure("periodic_pull", &e).await,
            }
        }
        info!("periodic pull loop stopped");
    })
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
