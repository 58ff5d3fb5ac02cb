// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket chat endpoint.
//!
//! `GET /ws/{session_id}` where the path segment is `"new"`, an SDK session
//! ID to resume, or an ephemeral `conn_*` ID.  The socket task owns the
//! sink; live events arrive through the connection registry channel, so
//! replay frames written directly here and channel frames never interleave
//! out of order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::connection::Outbound;
use crate::events::AgentEvent;
use crate::session::{AskUserOutcome, Session};
use crate::state::AppState;
use crate::transport::auth;

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws/{session_id}` — WebSocket upgrade for a chat session.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let expected = state.effective_auth_token().await;
    if auth::validate_ws_token(query.token.as_deref(), expected.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, socket, session_id)).into_response()
}

/// Per-connection socket task.
async fn handle_socket(state: Arc<AppState>, socket: WebSocket, path_session_id: String) {
    // Anything that is not "new" or an ephemeral connection ID is an SDK
    // session to resume.
    let resume = match path_session_id.as_str() {
        "new" => None,
        id if id.starts_with("conn_") => None,
        id => Some(id.to_owned()),
    };

    let connection_id = format!("conn_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]);
    let mut outbound = state.connections.register(&connection_id).await;

    let session = state.sessions.get_or_create(resume).await;
    let replay = state.sessions.attach(&session, &connection_id).await;
    let session_id = session.current_id().await;
    info!(
        connection_id = %connection_id,
        session_id = %session_id,
        buffered = replay.events.len(),
        "websocket attached"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Connection handshake, status summary, then the replay snapshot.
    let mut initial = vec![
        AgentEvent::Connected {
            connection_id: connection_id.clone(),
            session_id: Some(session_id),
        },
        replay.status,
    ];
    initial.extend(replay.events);
    for event in initial {
        if send_event(&mut ws_tx, &event).await.is_err() {
            state.sessions.detach(&session, &connection_id).await;
            state.connections.remove(&connection_id).await;
            return;
        }
    }
    state.sessions.finish_replay(&session, &connection_id).await;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Event(event)) => {
                    if send_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },

            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&state, &session, &connection_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, err = %e, "websocket read error");
                    break;
                }
                _ => {}
            },

            _ = state.shutdown.cancelled() => break,
        }
    }

    state.sessions.detach(&session, &connection_id).await;
    state.connections.remove(&connection_id).await;
    info!(connection_id = %connection_id, "websocket disconnected");
}

async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &AgentEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    ws_tx.send(Message::Text(text.into())).await
}

/// Incoming client frame.
#[derive(Debug, Deserialize)]
struct WsInput {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Handle one inbound frame. Protocol errors are answered through the
/// registry channel so ordering with live events is preserved.
async fn handle_client_message(
    state: &Arc<AppState>,
    session: &Arc<Session>,
    connection_id: &str,
    text: &str,
) {
    let input: WsInput = match serde_json::from_str(text) {
        Ok(input) => input,
        Err(e) => {
            send_protocol_error(state, connection_id, format!("Invalid message format: {e}"))
                .await;
            return;
        }
    };

    match input.kind.as_str() {
        "user_message" => {
            let Some(message) = input.data.get("message").and_then(|v| v.as_str()) else {
                send_protocol_error(
                    state,
                    connection_id,
                    "Missing 'message' field in data".to_owned(),
                )
                .await;
                return;
            };
            state
                .sessions
                .send_user_message_to(session, message.to_owned(), Some(connection_id))
                .await;
        }

        "ask_user_response" => {
            let question_id = input
                .data
                .get("question_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            let answers = input
                .data
                .get("answers")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let cancelled =
                input.data.get("cancelled").and_then(|v| v.as_bool()).unwrap_or(false);

            let outcome = state
                .sessions
                .submit_ask_user_response_to(
                    session,
                    &question_id,
                    answers,
                    cancelled,
                    Some(connection_id),
                )
                .await;
            match outcome {
                AskUserOutcome::Invalid(message) => {
                    send_protocol_error(state, connection_id, message).await;
                }
                AskUserOutcome::Ignored => {
                    warn!(question_id = %question_id, "ignored stale ask_user_response");
                }
                AskUserOutcome::Accepted | AskUserOutcome::SessionTaken => {}
            }
        }

        "interrupt" => {
            send_protocol_error(state, connection_id, "Interrupt not supported".to_owned()).await;
        }

        other => {
            send_protocol_error(state, connection_id, format!("Unknown message type: {other}"))
                .await;
        }
    }
}

async fn send_protocol_error(state: &Arc<AppState>, connection_id: &str, message: String) {
    state
        .connections
        .send(connection_id, AgentEvent::Error { error: message, is_permanent: None })
        .await;
}
