// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::time::Duration;

use primed::session::SessionTimings;
use primed_specs::{dir_entries, script, spec};

#[tokio::test]
async fn health_is_open_and_reports_identity() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");
    let resp = spec.server.get("/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert!(body["prime_agent_id"].as_str().expect("agent id").starts_with("agent_"));
    assert_eq!(body["active_sessions"], 0);
    assert_eq!(body["active_runs"], 0);
}

#[tokio::test]
async fn missing_bearer_token_is_401() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec.server.get("/devices").await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "AuthenticationError");

    let resp = spec.server.get("/devices").authorization_bearer("wrong").await;
    resp.assert_status_unauthorized();
}

#[tokio::test]
async fn capture_writes_file_before_responding() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec
        .server
        .post("/capture")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "text": "Remember to water the plants",
            "source": "iphone",
            "input": "voice",
            "captured_at": "2025-12-21T14:30:00Z",
            "context": {"app": "shortcuts"},
        }))
        .await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["dump_id"], "2025-12-21T14:30:00Z-iphone");

    // The file exists on disk before the 2xx response is consumed.
    let inbox_file = body["inbox_file"].as_str().expect("inbox_file");
    let path = spec.vault_path().join(inbox_file);
    assert!(path.exists(), "capture file missing: {}", path.display());

    let content = std::fs::read_to_string(path).expect("read capture");
    assert!(content.starts_with("---\n"));
    assert!(content.contains("Remember to water the plants"));
}

#[tokio::test]
async fn capture_with_empty_text_is_400() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec
        .server
        .post("/capture")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "text": "",
            "source": "mac",
            "input": "text",
            "captured_at": "2025-12-21T14:30:00Z",
            "context": {"app": "cli"},
        }))
        .await;
    resp.assert_status_bad_request();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "ValidationError");
}

// ===== Scenario: command run polling =========================================

#[tokio::test]
async fn command_run_trigger_and_poll() {
    let turns = vec![vec![
        script::text("one"),
        script::text("two"),
        script::text("three"),
        script::result(0.01, 150),
    ]];
    let spec = spec(turns, Some("secret"), SessionTimings::default()).await.expect("spec");
    spec.write_command("test", "Run the test command.\n");

    let resp = spec.server.post("/commands/test/trigger").authorization_bearer("secret").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    let run_id = body["run_id"].as_str().expect("run_id").to_owned();
    assert!(run_id.starts_with("cmdrun_"));
    assert_eq!(body["status"], "started");
    assert_eq!(body["poll_url"], format!("/commands/runs/{run_id}"));

    // Poll until the run completes.
    let mut last = serde_json::Value::Null;
    for _ in 0..100 {
        let resp = spec
            .server
            .get(&format!("/commands/runs/{run_id}"))
            .authorization_bearer("secret")
            .await;
        resp.assert_status_ok();
        last = resp.json();
        if last["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(last["status"], "completed");
    assert_eq!(last["cost_usd"], 0.01);
    assert_eq!(last["duration_ms"], 150);
    let events = last["events"].as_array().expect("events");
    assert_eq!(events.len(), 4);
    for (n, event) in events.iter().enumerate() {
        assert_eq!(event["event_id"], n as u64);
    }
    assert_eq!(events[3]["type"], "complete");
    assert_eq!(last["next_cursor"], 3);
    assert_eq!(last["dropped_before"], 0);

    // Caught-up poll: no events, same cursor.
    let resp = spec
        .server
        .get(&format!("/commands/runs/{run_id}?after=3"))
        .authorization_bearer("secret")
        .await;
    let body: serde_json::Value = resp.json();
    assert!(body["events"].as_array().expect("events").is_empty());
    assert_eq!(body["next_cursor"], 3);
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn unknown_command_is_404() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec.server.post("/commands/nope/trigger").authorization_bearer("secret").await;
    resp.assert_status_not_found();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn unknown_run_is_404() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp =
        spec.server.get("/commands/runs/cmdrun_missing").authorization_bearer("secret").await;
    resp.assert_status_not_found();
}

// ===== Devices ===============================================================

#[tokio::test]
async fn device_registration_and_listing_hides_push_url() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec
        .server
        .post("/devices/register")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "installation_id": "inst-1",
            "device_type": "iphone",
            "device_name": "My Phone",
            "push_url": "https://relay.example/push/p1/supersecret",
        }))
        .await;
    resp.assert_status_ok();

    let resp = spec.server.get("/devices").authorization_bearer("secret").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["total"], 1);
    let device = &body["devices"][0];
    assert_eq!(device["installation_id"], "inst-1");
    assert_eq!(device["device_name"], "My Phone");
    assert!(device.get("push_url").is_none(), "push_url must never be listed");
    assert!(!body.to_string().contains("supersecret"));
}

#[tokio::test]
async fn new_device_without_push_url_is_400() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec
        .server
        .post("/devices/register")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "installation_id": "inst-1",
            "device_type": "iphone",
        }))
        .await;
    resp.assert_status_bad_request();
}

// ===== Config and monitoring =================================================

#[tokio::test]
async fn config_reload_succeeds_and_bad_file_keeps_previous() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec.server.post("/config/reload").authorization_bearer("secret").await;
    resp.assert_status_ok();

    // Corrupt the file: reload reports failure, server keeps running.
    std::fs::write(spec.dir.path().join("primed.yaml"), "vault_path: [broken").expect("write");
    let resp = spec.server.post("/config/reload").authorization_bearer("secret").await;
    resp.assert_status_bad_request();

    // The previous snapshot still serves requests.
    let resp = spec.server.get("/devices").authorization_bearer("secret").await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn monitoring_reports_background_task_outcomes() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");
    spec.state.tracker.record_success("capture_auto_commit").await;
    spec.state
        .tracker
        .record_failure("periodic_pull", &anyhow::anyhow!("remote unreachable"))
        .await;

    let resp = spec
        .server
        .get("/monitoring/background-tasks/status")
        .authorization_bearer("secret")
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["successful_tasks"], 1);
    assert_eq!(body["failed_tasks"], 1);
    assert_eq!(body["recent_failures"][0]["task"], "periodic_pull");
}

#[tokio::test]
async fn capture_records_background_sync_outcome() {
    // Mirror is disabled in the harness; the background sync is a recorded
    // success because the no-op path completes cleanly.
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    let resp = spec
        .server
        .post("/capture")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "text": "note",
            "source": "mac",
            "input": "text",
            "captured_at": "2025-12-21T14:30:00Z",
            "context": {"app": "cli"},
        }))
        .await;
    resp.assert_status_ok();

    // Give the background task a moment to record its outcome.
    for _ in 0..100 {
        let status = spec.state.tracker.status().await;
        if status.successful_tasks > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("capture sync never recorded");
}

#[tokio::test]
async fn inbox_contains_exactly_the_capture_file() {
    let spec = spec(vec![], Some("secret"), SessionTimings::default()).await.expect("spec");

    spec.server
        .post("/capture")
        .authorization_bearer("secret")
        .json(&serde_json::json!({
            "text": "note",
            "source": "ipad",
            "input": "text",
            "captured_at": "2025-12-21T14:30:00Z",
            "context": {"app": "prime"},
        }))
        .await
        .assert_status_ok();

    let entries = dir_entries(&spec.vault_path().join("inbox"));
    assert_eq!(entries, vec!["2025-12-21T14-30-00Z-ipad.md".to_owned()]);
}
