// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seam to the external agent SDK.
//!
//! The coordinator only ever sees the trait surface here: a connector hands
//! out per-session clients, a client turns one prompt into a finite sequence
//! of typed messages, and a permission handler is consulted when the SDK
//! wants to use a named tool.  The production implementation drives the SDK
//! CLI as a subprocess; tests install scripted fakes.

pub mod cli;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

/// One message from the SDK stream for a single turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkMessage {
    /// Initialization message disclosing the SDK-assigned session ID.
    SystemInit { session_id: String },
    /// Assistant output, one or more content blocks.
    Assistant { blocks: Vec<ContentBlock> },
    /// Final message of a turn.
    Result {
        session_id: Option<String>,
        cost_usd: Option<f64>,
        duration_ms: Option<u64>,
        is_error: bool,
    },
}

/// A single assistant content block.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: serde_json::Value },
    Thinking { content: String },
}

/// Context passed alongside a permission check.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    /// Permission updates the SDK suggests applying when allowing.
    pub suggestions: serde_json::Value,
}

/// Decision returned from a permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow {
        updated_permissions: Option<serde_json::Value>,
        updated_input: Option<serde_json::Value>,
    },
    Deny {
        message: String,
        interrupt: bool,
    },
}

impl PermissionDecision {
    pub fn deny(message: impl Into<String>, interrupt: bool) -> Self {
        Self::Deny { message: message.into(), interrupt }
    }
}

/// Callback invoked by the SDK when it wants to use a named tool.
///
/// Object-safe for use as `Arc<dyn PermissionHandler>`.
pub trait PermissionHandler: Send + Sync + 'static {
    fn can_use_tool(
        &self,
        tool_name: String,
        tool_input: serde_json::Value,
        context: PermissionContext,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>>;
}

/// Permission handler that always allows with the SDK's own suggestions.
///
/// Command runs use this: there is no attached client to bridge questions to.
pub struct AllowAll;

impl PermissionHandler for AllowAll {
    fn can_use_tool(
        &self,
        _tool_name: String,
        _tool_input: serde_json::Value,
        context: PermissionContext,
    ) -> Pin<Box<dyn Future<Output = PermissionDecision> + Send + '_>> {
        Box::pin(async move {
            PermissionDecision::Allow {
                updated_permissions: Some(context.suggestions),
                updated_input: None,
            }
        })
    }
}

/// A long-lived SDK client bound to one session.
///
/// `run_turn` yields a channel that produces the turn's messages in order
/// and closes when the turn is over.  Dropping the receiver cancels the
/// turn on the SDK side.
pub trait SdkClient: Send + Sync + 'static {
    fn run_turn(
        &self,
        prompt: String,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Options for a one-shot query (no session, no resume).
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Tools the SDK may use; empty means none.
    pub allowed_tools: Vec<String>,
}

/// Factory for SDK clients.
pub trait SdkConnector: Send + Sync + 'static {
    /// Create a client, optionally resuming an SDK-persisted session.
    fn connect(
        &self,
        resume: Option<String>,
        permissions: Arc<dyn PermissionHandler>,
    ) -> Arc<dyn SdkClient>;

    /// Run a single detached prompt (used for title generation).
    fn query(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<mpsc::Receiver<SdkMessage>>> + Send + '_>>;
}
