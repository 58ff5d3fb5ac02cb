// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live WebSocket clients.
//!
//! Each connection registers an unbounded outbound channel; the socket task
//! on the other end serializes frames onto the wire.  Sends to a vanished
//! connection report failure so callers can fall back to buffering.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::events::AgentEvent;

/// Frame pushed to a connection's socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(AgentEvent),
    /// Instructs the socket task to close the connection.
    Close,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, mpsc::UnboundedSender<Outbound>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns the receiver for its socket task.
    pub async fn register(&self, connection_id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().await.insert(connection_id.to_owned(), tx);
        debug!(connection_id = %connection_id, "connection registered");
        rx
    }

    /// Remove a connection without sending anything.
    pub async fn remove(&self, connection_id: &str) {
        if self.connections.lock().await.remove(connection_id).is_some() {
            debug!(connection_id = %connection_id, "connection removed");
        }
    }

    /// Send an event to a connection. Returns false when the connection is
    /// gone (caller should buffer instead).
    pub async fn send(&self, connection_id: &str, event: AgentEvent) -> bool {
        let connections = self.connections.lock().await;
        match connections.get(connection_id) {
            Some(tx) => tx.send(Outbound::Event(event)).is_ok(),
            None => false,
        }
    }

    /// Ask a connection's socket task to close, and drop the registration.
    pub async fn disconnect(&self, connection_id: &str) {
        let tx = self.connections.lock().await.remove(connection_id);
        if let Some(tx) = tx {
            let _ = tx.send(Outbound::Close);
            debug!(connection_id = %connection_id, "connection disconnect requested");
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
