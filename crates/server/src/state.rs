// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared server state: every coordinator, injected once at startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureIngestor;
use crate::command_catalog::CommandCatalog;
use crate::command_run::CommandRunManager;
use crate::config::ConfigManager;
use crate::connection::ConnectionRegistry;
use crate::devices::DeviceRegistry;
use crate::identity::{self, AgentIdentity};
use crate::mirror::{self, VaultMirror};
use crate::push::{PushService, RelayClient};
use crate::sdk::SdkConnector;
use crate::session::{SessionManager, SessionTimings};
use crate::tracker::BackgroundTaskTracker;

/// Retention horizon for completed command runs.
const RUN_RETENTION: Duration = Duration::from_secs(60 * 60);
/// Event buffer bound per command run.
const RUN_MAX_EVENTS: usize = 200;

pub struct AppState {
    pub config: Arc<ConfigManager>,
    /// CLI-provided token; takes precedence over the config file.
    pub auth_override: Option<String>,
    pub identity: AgentIdentity,
    pub connections: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
    pub runs: Arc<CommandRunManager>,
    pub mirror: Arc<VaultMirror>,
    pub capture: Arc<CaptureIngestor>,
    pub devices: Arc<DeviceRegistry>,
    pub push: Arc<PushService>,
    pub tracker: Arc<BackgroundTaskTracker>,
    pub connector: Arc<dyn SdkConnector>,
    pub catalog: Arc<CommandCatalog>,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire every coordinator together. Fails fast on an unreadable data
    /// directory or a broken mirror configuration.
    pub async fn build(
        config: Arc<ConfigManager>,
        connector: Arc<dyn SdkConnector>,
        auth_override: Option<String>,
        timings: SessionTimings,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let snapshot = config.snapshot().await;
        let identity = identity::load_or_create(&snapshot.data_dir).await?;

        let vault_mutex = Arc::new(Mutex::new(()));
        let mirror = Arc::new(VaultMirror::new(Arc::clone(&config), Arc::clone(&vault_mutex)));
        mirror.initialize().await?;

        let devices = Arc::new(DeviceRegistry::new(snapshot.devices_file()));
        let push = Arc::new(PushService::new(
            Arc::clone(&devices),
            RelayClient::new(snapshot.relay_timeout()),
        ));
        let tracker = Arc::new(BackgroundTaskTracker::default());
        let connections = Arc::new(ConnectionRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&connections),
            Arc::clone(&connector),
            Arc::clone(&push),
            Arc::clone(&tracker),
            timings,
        ));
        let runs = Arc::new(CommandRunManager::new(RUN_RETENTION, RUN_MAX_EVENTS));
        let capture = Arc::new(CaptureIngestor::new(
            Arc::clone(&config),
            Arc::clone(&connector),
            vault_mutex,
        ));
        let catalog = Arc::new(CommandCatalog::new(&snapshot.vault_path));

        Ok(Arc::new(Self {
            config,
            auth_override,
            identity,
            connections,
            sessions,
            runs,
            mirror,
            capture,
            devices,
            push,
            tracker,
            connector,
            catalog,
            shutdown,
        }))
    }

    /// Session eviction, run retention, and the periodic pull loop.
    pub fn spawn_background_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.sessions.spawn_cleanup_loop(self.shutdown.child_token()),
            self.runs.spawn_cleanup_loop(self.shutdown.child_token()),
            mirror::spawn_pull_loop(
                Arc::clone(&self.mirror),
                Arc::clone(&self.tracker),
                self.shutdown.child_token(),
            ),
        ]
    }

    /// Bearer token in effect: CLI override first, then the live config.
    pub async fn effective_auth_token(&self) -> Option<String> {
        match self.auth_override {
            Some(ref token) => Some(token.clone()),
            None => self.config.snapshot().await.auth_token.clone(),
        }
    }
}
