// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Primed: per-user agent server brokering chat sessions, background
//! command runs, and capture ingestion against a git-mirrored vault.

pub mod buffer;
pub mod capture;
pub mod command_catalog;
pub mod command_run;
pub mod config;
pub mod connection;
pub mod devices;
pub mod error;
pub mod events;
pub mod frontmatter;
pub mod gitc;
pub mod identity;
pub mod mirror;
pub mod push;
pub mod runner;
pub mod sdk;
pub mod session;
pub mod state;
pub mod tracker;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Cli, ConfigManager};
use crate::sdk::cli::CliConnector;
use crate::session::SessionTimings;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the server until shutdown.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Arc::new(ConfigManager::load(&cli.config)?);
    let snapshot = config.snapshot().await;

    let connector = Arc::new(CliConnector::new(
        snapshot.runner.program.clone(),
        snapshot.vault_path.clone(),
    ));
    let timings = SessionTimings {
        turn_timeout: snapshot.turn_timeout(),
        ..SessionTimings::default()
    };

    let shutdown = CancellationToken::new();
    let state =
        AppState::build(config, connector, cli.auth_token, timings, shutdown.clone()).await?;
    let loops = state.spawn_background_loops();

    // Ctrl-C triggers the shutdown token; axum drains, then sessions die.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, agent_id = %state.identity.prime_agent_id, "primed listening");

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    state.sessions.terminate_all().await;
    for handle in loops {
        handle.abort();
    }
    Ok(())
}
