// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end API tests.
//!
//! Builds the real router over real state in-process, with the agent SDK
//! replaced by a scripted connector.  HTTP tests run against
//! `axum_test::TestServer`; WebSocket tests serve on an ephemeral TCP port
//! and connect with tungstenite.

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use axum_test::TestServer;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use primed::config::ConfigManager;
use primed::sdk::{PermissionHandler, QueryOptions, SdkClient, SdkConnector, SdkMessage};
use primed::session::SessionTimings;
use primed::state::AppState;
use primed::transport::build_router;

/// One step of a scripted SDK turn.
#[derive(Debug, Clone)]
pub enum Step {
    Message(SdkMessage),
    /// Pause before the next message (to order races deterministically).
    Delay(std::time::Duration),
}

/// SDK stand-in that replays scripted turns, one script per turn, shared
/// across every client it hands out.
pub struct ScriptedConnector {
    turns: Arc<Mutex<VecDeque<Vec<Step>>>>,
}

struct ScriptedClient {
    turns: Arc<Mutex<VecDeque<Vec<Step>>>>,
}

impl SdkConnector for ScriptedConnector {
    fn connect(
        &self,
        _resume: Option<String>,
        _permissions: Arc<dyn PermissionHandler>,
    ) -> Arc<dyn SdkClient> {
        Arc::new(ScriptedClient { turns: Arc::clone(&self.turns) })
    }

    fn query(
        &self,
        _prompt: String,
        _options: QueryOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>>
    {
        Box::pin(async { anyhow::bail!("no one-shot queries in spec tests") })
    }
}

impl SdkClient for ScriptedClient {
    fn run_turn(
        &self,
        _prompt: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>>
    {
        Box::pin(async move {
            let script = self.turns.lock().await.pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for step in script {
                    match step {
                        Step::Message(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Step::Delay(duration) => tokio::time::sleep(duration).await,
                    }
                }
            });
            Ok(rx)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// One fully wired server under test.
pub struct Spec {
    pub state: Arc<AppState>,
    pub server: TestServer,
    pub dir: tempfile::TempDir,
}

/// Build a spec harness with the given turn scripts and bearer token.
pub async fn spec(
    turns: Vec<Vec<Step>>,
    auth_token: Option<&str>,
    timings: SessionTimings,
) -> anyhow::Result<Spec> {
    let dir = tempfile::tempdir()?;
    let vault = dir.path().join("vault");
    std::fs::create_dir_all(&vault)?;

    let config_path = dir.path().join("primed.yaml");
    let mut yaml = format!(
        "vault_path: {}\ndata_dir: {}\ncapture_file_pattern: \"{{date}}-{{source}}.md\"\n",
        vault.display(),
        dir.path().join("data").display(),
    );
    if let Some(token) = auth_token {
        yaml.push_str(&format!("auth_token: {token}\n"));
    }
    std::fs::write(&config_path, yaml)?;

    let config = Arc::new(ConfigManager::load(&config_path)?);
    let connector =
        Arc::new(ScriptedConnector { turns: Arc::new(Mutex::new(turns.into())) });
    let state = AppState::build(
        config,
        connector,
        None,
        timings,
        CancellationToken::new(),
    )
    .await?;

    let server = TestServer::new(build_router(Arc::clone(&state)))
        .map_err(|e| anyhow::anyhow!("failed to create test server: {e}"))?;
    Ok(Spec { state, server, dir })
}

impl Spec {
    pub fn vault_path(&self) -> std::path::PathBuf {
        self.dir.path().join("vault")
    }

    /// Write a command file under `<vault>/.claude/commands/`.
    pub fn write_command(&self, name: &str, body: &str) {
        let path = self
            .vault_path()
            .join(".claude")
            .join("commands")
            .join(format!("{name}.md"));
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(path, body);
    }

    /// Serve the router on an ephemeral TCP port for WebSocket tests.
    pub async fn serve(&self) -> anyhow::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(Arc::clone(&self.state));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(addr)
    }
}

pub type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Open a chat WebSocket against a served harness.
pub async fn connect_ws(addr: SocketAddr, session_id: &str, token: Option<&str>) -> WsClient {
    let mut url = format!("ws://{addr}/ws/{session_id}");
    if let Some(token) = token {
        url.push_str(&format!("?token={token}"));
    }
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.expect("ws connect");
    ws
}

/// Read the next JSON frame, panicking on close or timeout.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(10), ws.next())
            .await
            .expect("ws read timeout")
            .expect("ws closed")
            .expect("ws error");
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Send a JSON frame.
pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.expect("ws send");
}

/// Convenience constructors for scripted turns.
pub mod script {
    use primed::sdk::{ContentBlock, SdkMessage};

    use super::Step;

    pub fn init(session_id: &str) -> Step {
        Step::Message(SdkMessage::SystemInit { session_id: session_id.to_owned() })
    }

    pub fn text(chunk: &str) -> Step {
        Step::Message(SdkMessage::Assistant {
            blocks: vec![ContentBlock::Text { text: chunk.to_owned() }],
        })
    }

    pub fn result(cost_usd: f64, duration_ms: u64) -> Step {
        Step::Message(SdkMessage::Result {
            session_id: None,
            cost_usd: Some(cost_usd),
            duration_ms: Some(duration_ms),
            is_error: false,
        })
    }

    pub fn delay(ms: u64) -> Step {
        Step::Delay(std::time::Duration::from_millis(ms))
    }
}

/// Ensure a directory entry count matches (helper for on-disk assertions).
pub fn dir_entries(path: &Path) -> Vec<String> {
    match std::fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
