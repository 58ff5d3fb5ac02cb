// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-backed SDK connector.
//!
//! Drives the agent CLI as a long-lived child process speaking newline-
//! delimited JSON on stdin/stdout (`--input-format stream-json` /
//! `--output-format stream-json`).  One child per session; turns are
//! strictly sequential, so the stdout reader is held for the duration of a
//! turn.  Tool-permission checks arrive as `control_request` lines and are
//! answered inline on stdin.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{
    ContentBlock, PermissionContext, PermissionDecision, PermissionHandler, QueryOptions,
    SdkClient, SdkConnector, SdkMessage,
};

/// Connector that spawns the configured agent CLI.
pub struct CliConnector {
    program: String,
    cwd: PathBuf,
}

impl CliConnector {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), cwd: cwd.into() }
    }
}

impl SdkConnector for CliConnector {
    fn connect(
        &self,
        resume: Option<String>,
        permissions: Arc<dyn PermissionHandler>,
    ) -> Arc<dyn SdkClient> {
        Arc::new(CliClient {
            program: self.program.clone(),
            cwd: self.cwd.clone(),
            resume,
            permissions,
            proc: Arc::new(Mutex::new(None)),
        })
    }

    fn query(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>> {
        let program = self.program.clone();
        let cwd = self.cwd.clone();
        Box::pin(async move {
            let mut child = Command::new(&program)
                .arg("--print")
                .arg(&prompt)
                .args(["--output-format", "stream-json", "--verbose"])
                .arg("--allowed-tools")
                .arg(options.allowed_tools.join(","))
                .current_dir(&cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to spawn {program}"))?;

            let stdout = child.stdout.take().context("query child has no stdout")?;
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                        continue;
                    };
                    let Some(message) = parse_message(&value) else {
                        continue;
                    };
                    let done = matches!(message, SdkMessage::Result { .. });
                    if tx.send(message).await.is_err() || done {
                        break;
                    }
                }
                let _ = child.wait().await;
            });
            Ok(rx)
        })
    }
}

struct ChildProc {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

/// One session's CLI client. The child is spawned on the first turn.
struct CliClient {
    program: String,
    cwd: PathBuf,
    resume: Option<String>,
    permissions: Arc<dyn PermissionHandler>,
    proc: Arc<Mutex<Option<ChildProc>>>,
}

impl CliClient {
    fn spawn_child(&self) -> anyhow::Result<ChildProc> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--input-format", "stream-json", "--output-format", "stream-json", "--verbose"])
            .args(["--permission-prompt-tool", "stdio"])
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(ref resume) = self.resume {
            cmd.args(["--resume", resume]);
        }
        let mut child =
            cmd.spawn().with_context(|| format!("failed to spawn {}", self.program))?;
        let stdin = child.stdin.take().context("agent child has no stdin")?;
        let stdout = child.stdout.take().context("agent child has no stdout")?;
        let lines = BufReader::new(stdout).lines();
        Ok(ChildProc { child, stdin, lines })
    }
}

impl SdkClient for CliClient {
    fn run_turn(
        &self,
        prompt: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>> {
        Box::pin(async move {
            let mut guard = Arc::clone(&self.proc).lock_owned().await;
            if guard.is_none() {
                *guard = Some(self.spawn_child()?);
            }
            let user_line = serde_json::json!({
                "type": "user",
                "message": {
                    "role": "user",
                    "content": [{"type": "text", "text": prompt}],
                },
            });
            if let Some(proc) = guard.as_mut() {
                write_line(&mut proc.stdin, &user_line).await?;
            }

            let permissions = Arc::clone(&self.permissions);
            let (tx, rx) = mpsc::channel(64);
            // The owned guard travels into the turn task; the child is held
            // exclusively until the turn ends.
            tokio::spawn(async move {
                let Some(proc) = guard.as_mut() else {
                    return;
                };
                loop {
                    let line = match proc.lines.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) | Err(_) => break,
                    };
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                        debug!("skipping non-JSON agent output line");
                        continue;
                    };
                    if value.get("type").and_then(|t| t.as_str()) == Some("control_request") {
                        if handle_control_request(proc, &permissions, &value).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    let Some(message) = parse_message(&value) else {
                        continue;
                    };
                    let done = matches!(message, SdkMessage::Result { .. });
                    if tx.send(message).await.is_err() {
                        // Consumer gone: ask the agent to stop the turn.
                        let interrupt = serde_json::json!({
                            "type": "control_request",
                            "request_id": uuid::Uuid::new_v4().simple().to_string(),
                            "request": {"subtype": "interrupt"},
                        });
                        let _ = write_line(&mut proc.stdin, &interrupt).await;
                        break;
                    }
                    if done {
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut guard = self.proc.lock().await;
            if let Some(mut proc) = guard.take() {
                if let Err(e) = proc.child.start_kill() {
                    warn!(err = %e, "failed to kill agent child");
                }
                let _ = proc.child.wait().await;
            }
        })
    }
}

async fn write_line(stdin: &mut ChildStdin, value: &serde_json::Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

/// Answer a `can_use_tool` control request on stdin.
async fn handle_control_request(
    proc: &mut ChildProc,
    permissions: &Arc<dyn PermissionHandler>,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let request_id =
        value.get("request_id").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
    let request = value.get("request").cloned().unwrap_or_default();
    if request.get("subtype").and_then(|v| v.as_str()) != Some("can_use_tool") {
        return Ok(());
    }

    let tool_name =
        request.get("tool_name").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
    let tool_input = request.get("input").cloned().unwrap_or_default();
    let context = PermissionContext {
        suggestions: request.get("permission_suggestions").cloned().unwrap_or_default(),
    };

    let decision = permissions.can_use_tool(tool_name, tool_input, context).await;
    let response = match decision {
        PermissionDecision::Allow { updated_permissions, updated_input } => {
            let mut body = serde_json::json!({"behavior": "allow"});
            if let Some(updated_input) = updated_input {
                body["updatedInput"] = updated_input;
            }
            if let Some(updated_permissions) = updated_permissions {
                body["updatedPermissions"] = updated_permissions;
            }
            body
        }
        PermissionDecision::Deny { message, interrupt } => {
            serde_json::json!({"behavior": "deny", "message": message, "interrupt": interrupt})
        }
    };

    let line = serde_json::json!({
        "type": "control_response",
        "response": {"subtype": "success", "request_id": request_id, "response": response},
    });
    write_line(&mut proc.stdin, &line).await
}

/// Map one stream-json line onto an [`SdkMessage`].
fn parse_message(value: &serde_json::Value) -> Option<SdkMessage> {
    match value.get("type").and_then(|t| t.as_str())? {
        "system" => {
            if value.get("subtype").and_then(|v| v.as_str()) != Some("init") {
                return None;
            }
            let session_id = value.get("session_id").and_then(|v| v.as_str())?.to_owned();
            Some(SdkMessage::SystemInit { session_id })
        }
        "assistant" => {
            let content = value.get("message")?.get("content")?.as_array()?;
            let blocks: Vec<ContentBlock> = content.iter().filter_map(parse_block).collect();
            if blocks.is_empty() {
                return None;
            }
            Some(SdkMessage::Assistant { blocks })
        }
        "result" => Some(SdkMessage::Result {
            session_id: value.get("session_id").and_then(|v| v.as_str()).map(String::from),
            cost_usd: value.get("total_cost_usd").and_then(|v| v.as_f64()),
            duration_ms: value.get("duration_ms").and_then(|v| v.as_u64()),
            is_error: value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false),
        }),
        _ => None,
    }
}

fn parse_block(block: &serde_json::Value) -> Option<ContentBlock> {
    match block.get("type").and_then(|t| t.as_str())? {
        "text" => Some(ContentBlock::Text {
            text: block.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            name: block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
            input: block.get("input").cloned().unwrap_or_default(),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            content: block.get("thinking").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
        }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
