// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(http::health))
        // Captures
        .route("/capture", post(http::capture))
        // Command runs
        .route("/commands/{name}/trigger", post(http::trigger_command))
        .route("/commands/runs/{run_id}", get(http::get_command_run))
        // Configuration
        .route("/config/reload", post(http::reload_config))
        // Devices & notifications
        .route("/devices/register", post(http::register_device))
        .route("/devices", get(http::list_devices))
        .route("/notifications/send", post(http::send_notification))
        // Monitoring
        .route("/monitoring/background-tasks/status", get(http::background_task_status))
        // Chat WebSocket
        .route("/ws/{session_id}", get(ws::ws_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
