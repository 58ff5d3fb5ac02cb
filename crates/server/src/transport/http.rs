// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for captures, command runs, devices, and monitoring.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::capture::CaptureRequest;
use crate::command_run::{RunStatus, StatusUpdate};
use crate::error::ApiError;
use crate::events::AgentEvent;
use crate::mirror::RunSyncMeta;
use crate::runner;
use crate::sdk::AllowAll;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub prime_agent_id: String,
    pub active_sessions: usize,
    pub active_runs: usize,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub ok: bool,
    pub inbox_file: String,
    pub dump_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub scheduled: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub run_id: String,
    pub status: String,
    pub poll_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub after: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRegisterRequest {
    pub installation_id: String,
    pub device_type: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub push_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceRegisterResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DeviceListQuery {
    pub device_filter: Option<String>,
}

/// Listing view of a binding; `push_url` is a capability URL and is never
/// returned.
#[derive(Debug, Serialize)]
pub struct SafeDevice {
    pub installation_id: String,
    pub device_type: String,
    pub device_name: Option<String>,
    pub registered_at: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub total: usize,
    pub devices: Vec<SafeDevice>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationSendRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub device_filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationSendResponse {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub invalid_tokens_removed: usize,
    pub devices: Vec<crate::push::DeviceResult>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /health` (unauthenticated).
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        prime_agent_id: state.identity.prime_agent_id.clone(),
        active_sessions: state.sessions.session_count().await,
        active_runs: state.runs.active_count().await,
    })
}

/// `POST /capture` — write the capture, then mirror in the background.
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CaptureRequest>,
) -> impl IntoResponse {
    if request.text.is_empty() {
        return ApiError::Validation.to_http_response("text must not be empty").into_response();
    }

    let outcome = match state.capture.ingest(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(err = %format!("{e:#}"), "failed to write capture file");
            return ApiError::Vault.to_http_response("Failed to save capture").into_response();
        }
    };

    // Mirror commit runs after the response; failures only reach the tracker.
    let background = Arc::clone(&state);
    tokio::spawn(async move {
        match background.mirror.sync_capture().await {
            Ok(()) => background.tracker.record_success("capture_auto_commit").await,
            Err(e) => background.tracker.record_failure("capture_auto_commit", &e).await,
        }
    });

    Json(CaptureResponse {
        ok: true,
        inbox_file: outcome.relative_path,
        dump_id: outcome.dump_id,
    })
    .into_response()
}

/// `POST /commands/{name}/trigger` — start a background command run.
pub async fn trigger_command(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<TriggerRequest>>,
) -> impl IntoResponse {
    let prompt = match state.catalog.resolve(&name).await {
        Ok(Some(prompt)) => prompt,
        Ok(None) => {
            return ApiError::NotFound
                .to_http_response(format!("Command '{name}' not found"))
                .into_response();
        }
        Err(e) => {
            error!(command_name = %name, err = %format!("{e:#}"), "failed to resolve command");
            return ApiError::Vault.to_http_response("Failed to read command").into_response();
        }
    };

    let scheduled = body.map(|Json(request)| request.scheduled).unwrap_or_default();
    let run_id = state.runs.create(&name).await;

    let task_state = Arc::clone(&state);
    let task_run_id = run_id.clone();
    let task_name = name.clone();
    let handle = tokio::spawn(async move {
        drive_command_run(task_state, task_run_id, task_name, prompt, scheduled).await;
    });
    state.runs.attach_task(&run_id, handle).await;

    let poll_url = format!("/commands/runs/{run_id}");
    Json(TriggerResponse { run_id, status: "started".to_owned(), poll_url }).into_response()
}

/// `GET /commands/runs/{run_id}?after=<int>` — poll events and status.
pub async fn get_command_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> impl IntoResponse {
    match state.runs.get(&run_id, query.after).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => ApiError::NotFound
            .to_http_response(format!("Run '{run_id}' not found"))
            .into_response(),
    }
}

/// Execution protocol for one command run: stream events into the buffer,
/// set the terminal status, then hand off to the mirror coordinator.
async fn drive_command_run(
    state: Arc<AppState>,
    run_id: String,
    command_name: String,
    prompt: String,
    scheduled: bool,
) {
    state.runs.set_status(&run_id, RunStatus::Running, StatusUpdate::default()).await;

    let client = state.connector.connect(None, Arc::new(AllowAll));
    let turn_timeout = state.config.snapshot().await.turn_timeout();
    let mut events = runner::spawn_turn(Arc::clone(&client), prompt, turn_timeout);

    let mut status = RunStatus::Completed;
    let mut update = StatusUpdate::default();
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::Complete { cost_usd, duration_ms, .. } => {
                status = RunStatus::Completed;
                update.cost_usd = cost_usd;
                update.duration_ms = duration_ms;
            }
            AgentEvent::Error { ref error, is_permanent: Some(true) } => {
                status = RunStatus::Error;
                update.error = Some(error.clone());
            }
            _ => {}
        }
        state.runs.append_event(&run_id, event).await;
    }
    state.runs.set_status(&run_id, status, update.clone()).await;
    client.close().await;

    // Post-run sync failures never change the run status.
    let meta = RunSyncMeta {
        command_name,
        run_id: Some(run_id),
        status: status.as_str().to_owned(),
        scheduled,
        duration_ms: update.duration_ms,
        cost_usd: update.cost_usd,
        error: update.error,
    };
    match state.mirror.sync_command_run(&meta).await {
        Ok(()) => state.tracker.record_success("command_run_sync").await,
        Err(e) => state.tracker.record_failure("command_run_sync", &e).await,
    }
}

/// `POST /config/reload` — re-parse the YAML config.
pub async fn reload_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.config.reload().await {
        Ok(()) => Json(serde_json::json!({"status": "reloaded"})).into_response(),
        Err(e) => ApiError::Validation
            .to_http_response(format!("config reload failed: {e:#}"))
            .into_response(),
    }
}

/// `POST /devices/register` — upsert a device binding.
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRegisterRequest>,
) -> impl IntoResponse {
    if request.installation_id.is_empty() {
        return ApiError::Validation
            .to_http_response("installation_id must not be empty")
            .into_response();
    }

    match state
        .devices
        .upsert(
            &request.installation_id,
            &request.device_type,
            request.device_name.as_deref(),
            request.push_url.as_deref(),
        )
        .await
    {
        Ok(()) => Json(DeviceRegisterResponse {
            success: true,
            message: "Device registered successfully".to_owned(),
        })
        .into_response(),
        Err(e) if e.to_string().contains("push_url is required") => {
            ApiError::Validation.to_http_response(e.to_string()).into_response()
        }
        Err(e) => {
            error!(
                installation_id = %request.installation_id,
                err = %format!("{e:#}"),
                "failed to register device"
            );
            ApiError::Internal.to_http_response("Failed to register device").into_response()
        }
    }
}

/// `GET /devices` — list bindings, capability URLs withheld.
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceListQuery>,
) -> impl IntoResponse {
    match state.devices.list(query.device_filter.as_deref()).await {
        Ok(devices) => {
            let devices: Vec<SafeDevice> = devices
                .into_iter()
                .map(|d| SafeDevice {
                    installation_id: d.installation_id,
                    device_type: d.device_type,
                    device_name: d.device_name,
                    registered_at: d.registered_at,
                    last_seen: d.last_seen,
                })
                .collect();
            Json(DeviceListResponse { total: devices.len(), devices }).into_response()
        }
        Err(e) => {
            error!(err = %format!("{e:#}"), "failed to list devices");
            ApiError::Internal.to_http_response("Failed to list devices").into_response()
        }
    }
}

/// `POST /notifications/send` — fan a notification out to devices.
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationSendRequest>,
) -> impl IntoResponse {
    match state
        .push
        .send_notification(
            &request.title,
            &request.body,
            request.data,
            request.device_filter.as_deref(),
        )
        .await
    {
        Ok(summary) => {
            info!(sent = summary.sent, failed = summary.failed, "notification send completed");
            Json(NotificationSendResponse {
                success: summary.failed == 0,
                sent: summary.sent,
                failed: summary.failed,
                invalid_tokens_removed: summary.invalid_tokens_removed,
                devices: summary.devices,
            })
            .into_response()
        }
        Err(e) => {
            error!(err = %format!("{e:#}"), "failed to send notifications");
            ApiError::Internal
                .to_http_response(format!("Failed to send notifications: {e}"))
                .into_response()
        }
    }
}

/// `GET /monitoring/background-tasks/status`.
pub async fn background_task_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.tracker.status().await)
}
