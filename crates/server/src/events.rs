// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format event types shared by sessions, command runs, and transports.
//!
//! Events are a closed sum type internally and serialize to tagged JSON only
//! at the transport boundary.  Field casing on the wire is part of the client
//! contract: run metadata is snake_case, per-turn cost/duration and the
//! permanence flag are camelCase.

use serde::{Deserialize, Serialize};

/// Events produced by the agent runner and the session/connection layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The SDK disclosed its session ID (at most once per rekey).
    SessionId {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// A chunk of assistant text.
    Text { chunk: String },
    /// The assistant invoked a tool.
    ToolUse { name: String, input: serde_json::Value },
    /// Assistant thinking content.
    Thinking { content: String },
    /// The SDK requested a mid-turn user decision.
    AskUserQuestion {
        question_id: String,
        questions: Vec<serde_json::Value>,
        timeout_seconds: u64,
    },
    /// A pending user question expired.
    AskUserTimeout { question_id: String, error: String },
    /// Terminal: the turn finished.
    Complete {
        status: String,
        #[serde(rename = "costUsd", skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// Terminal when `is_permanent` is set: the turn failed.
    Error {
        error: String,
        #[serde(rename = "isPermanent", skip_serializing_if = "Option::is_none")]
        is_permanent: Option<bool>,
    },
    /// First frame on a WebSocket connection.
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Session summary sent immediately after `connected`.
    SessionStatus {
        buffered_count: usize,
        completed_at: Option<String>,
        last_activity: String,
        last_event_type: Option<String>,
        is_processing: bool,
        waiting_for_user: bool,
        pending_question_id: Option<String>,
    },
    /// Another client attached; the receiving socket must treat itself closed.
    SessionTaken,
}

impl AgentEvent {
    /// The wire tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionId { .. } => "session_id",
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::Thinking { .. } => "thinking",
            Self::AskUserQuestion { .. } => "ask_user_question",
            Self::AskUserTimeout { .. } => "ask_user_timeout",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Connected { .. } => "connected",
            Self::SessionStatus { .. } => "session_status",
            Self::SessionTaken => "session_taken",
        }
    }

    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Error { is_permanent: Some(true), .. }
        )
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
