// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the chat WebSocket: connect, rekey, takeover, and
//! the offline completion notification.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use primed::session::SessionTimings;
use primed_specs::{connect_ws, next_json, script, send_json, spec};

// ===== Scenario A: pending-id rekey ==========================================

#[tokio::test]
async fn new_session_rekeys_on_first_turn() {
    let turns = vec![vec![
        script::init("abc-123"),
        script::text("hello"),
        script::result(0.02, 200),
    ]];
    let spec = spec(turns, None, SessionTimings::default()).await.expect("spec");
    let addr = spec.serve().await.expect("serve");

    let mut ws = connect_ws(addr, "new", None).await;

    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["connectionId"].as_str().expect("connectionId").starts_with("conn_"));
    let pending_id = connected["sessionId"].as_str().expect("sessionId").to_owned();
    assert!(pending_id.starts_with("pending_"));

    let status = next_json(&mut ws).await;
    assert_eq!(status["type"], "session_status");
    assert_eq!(status["buffered_count"], 0);
    assert_eq!(status["is_processing"], false);

    send_json(&mut ws, serde_json::json!({"type": "user_message", "data": {"message": "hi"}}))
        .await;

    let session_id = next_json(&mut ws).await;
    assert_eq!(session_id["type"], "session_id");
    assert_eq!(session_id["sessionId"], "abc-123");

    let text = next_json(&mut ws).await;
    assert_eq!(text["type"], "text");
    assert_eq!(text["chunk"], "hello");

    let complete = next_json(&mut ws).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["status"], "success");
    assert_eq!(complete["costUsd"], 0.02);
    assert_eq!(complete["durationMs"], 200);

    // Registry holds the SDK key and no longer the pending one.
    assert!(spec.state.sessions.get("abc-123").await.is_some());
    assert!(spec.state.sessions.get(&pending_id).await.is_none());
}

// ===== Scenario C: takeover ==================================================

#[tokio::test]
async fn second_client_takes_over_the_session() {
    let turns = vec![vec![script::init("abc-123"), script::result(0.01, 50)]];
    let spec = spec(turns, None, SessionTimings::default()).await.expect("spec");
    let addr = spec.serve().await.expect("serve");

    // Client A creates the session and finishes a turn so it has a real ID.
    let mut ws_a = connect_ws(addr, "new", None).await;
    next_json(&mut ws_a).await; // connected
    next_json(&mut ws_a).await; // session_status
    send_json(&mut ws_a, serde_json::json!({"type": "user_message", "data": {"message": "hi"}}))
        .await;
    next_json(&mut ws_a).await; // session_id
    next_json(&mut ws_a).await; // complete

    // Client B resumes the same session.
    let mut ws_b = connect_ws(addr, "abc-123", None).await;
    let connected_b = next_json(&mut ws_b).await;
    assert_eq!(connected_b["type"], "connected");
    assert_eq!(connected_b["sessionId"], "abc-123");

    // A is told the session was taken, then its socket closes.
    let taken = next_json(&mut ws_a).await;
    assert_eq!(taken["type"], "session_taken");
    let closed = tokio::time::timeout(Duration::from_secs(5), ws_a.next())
        .await
        .expect("close timeout");
    match closed {
        None => {}
        Some(Ok(frame)) => assert!(frame.is_close(), "expected close, got {frame:?}"),
        Some(Err(_)) => {}
    }
}

#[tokio::test]
async fn interrupt_is_answered_with_an_error_frame() {
    let spec = spec(vec![], None, SessionTimings::default()).await.expect("spec");
    let addr = spec.serve().await.expect("serve");

    let mut ws = connect_ws(addr, "new", None).await;
    next_json(&mut ws).await; // connected
    next_json(&mut ws).await; // session_status

    send_json(&mut ws, serde_json::json!({"type": "interrupt"})).await;
    let error = next_json(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(error["error"].as_str().expect("error").contains("Interrupt"));
    assert!(error.get("isPermanent").is_none());
}

#[tokio::test]
async fn ws_requires_token_when_auth_is_enabled() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");
    let addr = spec.serve().await.expect("serve");

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/new")).await;
    assert!(result.is_err(), "unauthenticated upgrade must be rejected");

    let mut ws = connect_ws(addr, "new", Some("secret")).await;
    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
}

// ===== Scenario F: offline completion notification ===========================

#[tokio::test]
async fn offline_completion_sends_push_after_grace_period() {
    let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

    // Relay stub recording every push payload.
    let sink = Arc::clone(&received);
    let relay = Router::new().route(
        "/push/{id}/{secret}",
        post(move |Path((_, _)): Path<(String, String)>, Json(body): Json<serde_json::Value>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(body);
                Json(serde_json::json!({"queued": true}))
            }
        }),
    );
    let relay_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let relay_addr = relay_listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(relay_listener, relay).await;
    });

    // The delay keeps the turn open long enough for the client's disconnect
    // to be observed before the terminal event lands.
    let turns = vec![vec![script::init("abc-123"), script::delay(300), script::result(0.02, 200)]];
    let timings =
        SessionTimings { grace_period: Duration::from_millis(200), ..SessionTimings::default() };
    let spec = spec(turns, None, timings).await.expect("spec");
    spec.state
        .devices
        .upsert(
            "inst-1",
            "iphone",
            Some("Phone"),
            Some(&format!("http://{relay_addr}/push/p1/secret")),
        )
        .await
        .expect("register device");

    let addr = spec.serve().await.expect("serve");

    // Start a turn, then disconnect before it completes.
    let mut ws = connect_ws(addr, "new", None).await;
    next_json(&mut ws).await; // connected
    next_json(&mut ws).await; // session_status
    send_json(&mut ws, serde_json::json!({"type": "user_message", "data": {"message": "hi"}}))
        .await;
    drop(ws);

    // Grace period passes with no client attached: exactly one notification.
    let mut payload = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pushed = received.lock().await;
        if let Some(first) = pushed.first() {
            payload = Some(first.clone());
            break;
        }
    }
    let payload = payload.expect("no push notification received");
    assert_eq!(payload["title"], "Chat response ready");
    assert_eq!(payload["data"]["type"], "chat_complete");
    assert_eq!(payload["data"]["session_id"], "abc-123");
    assert_eq!(payload["data"]["deeplink_url"], "prime://chat/session/abc-123");
    assert_eq!(payload["data"]["costUsd"], 0.02);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(received.lock().await.len(), 1, "notification must be sent once");
}

#[tokio::test]
async fn reconnect_during_grace_period_suppresses_push() {
    let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let relay = Router::new().route(
        "/push/{id}/{secret}",
        post(move |Json(body): Json<serde_json::Value>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(body);
                Json(serde_json::json!({"queued": true}))
            }
        }),
    );
    let relay_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let relay_addr = relay_listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(relay_listener, relay).await;
    });

    let turns = vec![vec![script::init("abc-123"), script::delay(200), script::result(0.02, 200)]];
    let timings =
        SessionTimings { grace_period: Duration::from_millis(500), ..SessionTimings::default() };
    let spec = spec(turns, None, timings).await.expect("spec");
    spec.state
        .devices
        .upsert(
            "inst-1",
            "iphone",
            None,
            Some(&format!("http://{relay_addr}/push/p1/secret")),
        )
        .await
        .expect("register device");

    let addr = spec.serve().await.expect("serve");

    let mut ws = connect_ws(addr, "new", None).await;
    next_json(&mut ws).await; // connected
    next_json(&mut ws).await; // session_status
    send_json(&mut ws, serde_json::json!({"type": "user_message", "data": {"message": "hi"}}))
        .await;
    drop(ws);

    // Reattach within the grace window (turn completes at ~200ms, push would
    // fire at ~700ms).
    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut ws2 = connect_ws(addr, "abc-123", None).await;
    next_json(&mut ws2).await; // connected

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(received.lock().await.is_empty(), "push must be suppressed on reconnect");
}
