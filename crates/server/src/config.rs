// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process flags and the reloadable YAML configuration.
//!
//! CLI flags cover what must be known before the config file is read (where
//! it lives, bind address, auth override).  Everything else comes from the
//! YAML file, with `${VAR}` environment expansion applied to the raw text
//! before parsing.  Reload swaps an `Arc` snapshot; an invalid file keeps
//! the previous snapshot in place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Command-line flags for the primed server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "primed", about = "Per-user agent server for a knowledge vault")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "PRIMED_CONFIG", default_value = "primed.yaml")]
    pub config: PathBuf,

    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "PRIMED_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8787, env = "PRIMED_PORT")]
    pub port: u16,

    /// Bearer token override; takes precedence over the config file.
    #[arg(long, env = "PRIMED_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

// -- YAML schema --------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub vault_path: PathBuf,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_inbox_folder")]
    pub inbox_folder: String,
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,
    #[serde(default = "default_capture_pattern")]
    pub capture_file_pattern: String,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default = "default_git_user_name")]
    pub user_name: String,
    #[serde(default = "default_git_user_email")]
    pub user_email: String,
    #[serde(default = "default_git_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_pull_interval")]
    pub pull_interval_seconds: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_url: None,
            user_name: default_git_user_name(),
            user_email: default_git_user_email(),
            timeout_seconds: default_git_timeout(),
            pull_interval_seconds: default_pull_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Command spawned as the agent SDK.
    #[serde(default = "default_agent_program")]
    pub program: String,
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_seconds: u64,
    #[serde(default = "default_title_timeout")]
    pub title_timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            turn_timeout_seconds: default_turn_timeout(),
            title_timeout_seconds: default_title_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    #[serde(default = "default_relay_timeout")]
    pub relay_timeout_seconds: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { relay_timeout_seconds: default_relay_timeout() }
    }
}

fn default_inbox_folder() -> String {
    "inbox".to_owned()
}
fn default_logs_folder() -> String {
    "logs/command-runs".to_owned()
}
fn default_capture_pattern() -> String {
    "{date}-{source}-{title}.md".to_owned()
}
fn default_git_user_name() -> String {
    "Prime Agent".to_owned()
}
fn default_git_user_email() -> String {
    "prime@local".to_owned()
}
fn default_git_timeout() -> u64 {
    30
}
fn default_pull_interval() -> u64 {
    300
}
fn default_agent_program() -> String {
    "claude".to_owned()
}
fn default_turn_timeout() -> u64 {
    600
}
fn default_title_timeout() -> u64 {
    20
}
fn default_relay_timeout() -> u64 {
    10
}

impl AppConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.mirror.timeout_seconds)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.mirror.pull_interval_seconds)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.turn_timeout_seconds)
    }

    pub fn title_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.title_timeout_seconds)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.push.relay_timeout_seconds)
    }

    pub fn devices_file(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }
}

// -- Manager ------------------------------------------------------------------

/// Holds the live configuration snapshot and reloads it on demand.
pub struct ConfigManager {
    path: PathBuf,
    current: RwLock<Arc<AppConfig>>,
}

impl ConfigManager {
    /// Parse the file at `path`. Startup fails on an invalid file.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let config = parse_config_file(&path)?;
        Ok(Self { path, current: RwLock::new(Arc::new(config)) })
    }

    /// Build a manager from an already-parsed config (tests).
    pub fn from_config(config: AppConfig) -> Self {
        Self { path: PathBuf::new(), current: RwLock::new(Arc::new(config)) }
    }

    /// The live snapshot. Cheap to clone; callers must not cache it across
    /// reload boundaries.
    pub async fn snapshot(&self) -> Arc<AppConfig> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-parse the file. An invalid file leaves the previous snapshot
    /// untouched and returns the parse error.
    pub async fn reload(&self) -> anyhow::Result<()> {
        match parse_config_file(&self.path) {
            Ok(config) => {
                *self.current.write().await = Arc::new(config);
                info!(path = %self.path.display(), "configuration reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), err = %format!("{e:#}"), "config reload failed, keeping previous");
                Err(e)
            }
        }
    }
}

fn parse_config_file(path: &PathBuf) -> anyhow::Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let expanded = expand_env(&raw);
    serde_yaml::from_str(&expanded)
        .with_context(|| format!("parsing config {}", path.display()))
}

/// Expand `${VAR}` references against the process environment.
///
/// Unknown variables expand to the empty string, which YAML-parses as null
/// for optional fields.
pub fn expand_env(raw: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern, cannot fail
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
    });
    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
