// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-prompt executor: converts one SDK turn into typed events.
//!
//! Exactly one terminal event (`complete` or `error`) is emitted per turn,
//! on every path: normal result, error result, stream failure, and wall
//! clock expiry.  Nothing is emitted after the terminal event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::events::AgentEvent;
use crate::sdk::{ContentBlock, QueryOptions, SdkClient, SdkConnector, SdkMessage};

/// Maximum title length accepted from the title generator.
pub const MAX_TITLE_CHARS: usize = 80;

/// Run one turn against `client`, yielding events through the returned
/// channel.  The channel closes after the terminal event.  Dropping the
/// receiver cancels the turn.
pub fn spawn_turn(
    client: Arc<dyn SdkClient>,
    prompt: String,
    timeout: Duration,
) -> mpsc::Receiver<AgentEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut terminal_sent = false;
        let outcome =
            tokio::time::timeout_at(deadline, drive(client, prompt, &tx, &mut terminal_sent))
                .await;
        if terminal_sent {
            return;
        }
        let error = match outcome {
            Ok(Ok(())) => "agent stream ended without a result".to_owned(),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("turn timed out after {}s", timeout.as_secs()),
        };
        let _ = tx.send(AgentEvent::Error { error, is_permanent: Some(true) }).await;
    });
    rx
}

/// Consume the SDK stream and translate messages into events.
///
/// `terminal_sent` is set once a terminal event went out (or the consumer is
/// gone, in which case there is nobody left to tell).
async fn drive(
    client: Arc<dyn SdkClient>,
    prompt: String,
    tx: &mpsc::Sender<AgentEvent>,
    terminal_sent: &mut bool,
) -> anyhow::Result<()> {
    let mut messages = client.run_turn(prompt).await?;
    let mut session_id_sent = false;

    while let Some(message) = messages.recv().await {
        match message {
            SdkMessage::SystemInit { session_id } => {
                if !session_id_sent {
                    session_id_sent = true;
                    if tx.send(AgentEvent::SessionId { session_id }).await.is_err() {
                        *terminal_sent = true;
                        return Ok(());
                    }
                }
            }
            SdkMessage::Assistant { blocks } => {
                for block in blocks {
                    let event = match block {
                        ContentBlock::Text { text } => AgentEvent::Text { chunk: text },
                        ContentBlock::ToolUse { name, input } => {
                            AgentEvent::ToolUse { name, input }
                        }
                        ContentBlock::Thinking { content } => AgentEvent::Thinking { content },
                    };
                    if tx.send(event).await.is_err() {
                        *terminal_sent = true;
                        return Ok(());
                    }
                }
            }
            SdkMessage::Result { session_id, cost_usd, duration_ms, is_error } => {
                if let Some(session_id) = session_id {
                    if !session_id_sent {
                        session_id_sent = true;
                        if tx.send(AgentEvent::SessionId { session_id }).await.is_err() {
                            *terminal_sent = true;
                            return Ok(());
                        }
                    }
                }
                let terminal = if is_error {
                    AgentEvent::Error {
                        error: "agent returned an error result".to_owned(),
                        is_permanent: Some(true),
                    }
                } else {
                    AgentEvent::Complete { status: "success".to_owned(), cost_usd, duration_ms }
                };
                let _ = tx.send(terminal).await;
                *terminal_sent = true;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Generate a short single-line title for `text`.
///
/// Specialized invocation: no tools, tight wall clock. Returns `None` on any
/// failure — callers must treat the title as best-effort.
pub async fn generate_title(
    connector: &dyn SdkConnector,
    text: &str,
    timeout: Duration,
) -> Option<String> {
    let prompt = format!(
        "Reply with a short descriptive title for this note. \
         One line, at most {MAX_TITLE_CHARS} characters, no quotes.\n\n{text}"
    );
    let generate = async {
        let mut messages =
            connector.query(prompt, QueryOptions { allowed_tools: vec![] }).await.ok()?;
        let mut collected = String::new();
        while let Some(message) = messages.recv().await {
            match message {
                SdkMessage::Assistant { blocks } => {
                    for block in blocks {
                        if let ContentBlock::Text { text } = block {
                            collected.push_str(&text);
                        }
                    }
                }
                SdkMessage::Result { is_error: true, .. } => return None,
                SdkMessage::Result { .. } => break,
                SdkMessage::SystemInit { .. } => {}
            }
        }
        let line = collected.lines().map(str::trim).find(|l| !l.is_empty())?;
        Some(line.chars().take(MAX_TITLE_CHARS).collect::<String>())
    };
    tokio::time::timeout(timeout, generate).await.ok().flatten()
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
