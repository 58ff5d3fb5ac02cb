// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory lifecycle and event buffering for background command runs.
//!
//! Runs are created by the HTTP boundary, driven by a detached task, and
//! observed through cursor-based polling.  Event buffers are bounded; a
//! polling client that falls behind detects loss through `dropped_before`.
//! Completed runs are retained for a fixed horizon, then swept.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::{EventBuffer, CURSOR_NONE};
use crate::events::AgentEvent;

/// Status of a command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Completion metadata attached alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub error: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

struct CommandRun {
    run_id: String,
    command_name: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    error: Option<String>,
    buffer: EventBuffer,
    task: Option<JoinHandle<()>>,
}

/// Poll response: run metadata plus events after the cursor.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub command_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub events: Vec<serde_json::Value>,
    pub next_cursor: i64,
    pub dropped_before: u64,
}

/// Registry of command runs behind one async mutex.
pub struct CommandRunManager {
    runs: Mutex<HashMap<String, CommandRun>>,
    retention: Duration,
    max_events_per_run: usize,
}

impl CommandRunManager {
    pub fn new(retention: Duration, max_events_per_run: usize) -> Self {
        Self { runs: Mutex::new(HashMap::new()), retention, max_events_per_run }
    }

    /// Create a run in `started` state and return its ID.
    pub async fn create(&self, command_name: &str) -> String {
        let run_id = format!("cmdrun_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]);
        let run = CommandRun {
            run_id: run_id.clone(),
            command_name: command_name.to_owned(),
            status: RunStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            cost_usd: None,
            duration_ms: None,
            error: None,
            buffer: EventBuffer::new(self.max_events_per_run),
            task: None,
        };
        self.runs.lock().await.insert(run_id.clone(), run);
        info!(run_id = %run_id, command_name = %command_name, "created command run");
        run_id
    }

    /// Transition status and record completion metadata.
    ///
    /// Terminal statuses set `completed_at`; a terminal run never moves back
    /// to a non-terminal status (the latest terminal status wins).
    pub async fn set_status(&self, run_id: &str, status: RunStatus, update: StatusUpdate) {
        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(run_id) else {
            warn!(run_id = %run_id, "attempted to update non-existent run");
            return;
        };
        if run.status.is_terminal() && !status.is_terminal() {
            return;
        }

        run.status = status;
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        if let Some(error) = update.error {
            run.error = Some(error);
        }
        if update.cost_usd.is_some() {
            run.cost_usd = update.cost_usd;
        }
        if update.duration_ms.is_some() {
            run.duration_ms = update.duration_ms;
        }
        drop(runs);
        info!(run_id = %run_id, status = ?status, "updated command run status");
    }

    /// Append an event. Unknown runs are dropped with a warning.
    pub async fn append_event(&self, run_id: &str, event: AgentEvent) {
        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(run_id) else {
            warn!(run_id = %run_id, "attempted to append event to non-existent run");
            return;
        };
        let event_id = run.buffer.append(event);
        debug!(run_id = %run_id, event_id, "appended event to run");
    }

    /// Snapshot a run with events strictly after `after`.
    ///
    /// `after = None` (or `-1`) returns everything, so a first poll observes
    /// event ID 0.
    pub async fn get(&self, run_id: &str, after: Option<i64>) -> Option<RunSnapshot> {
        let runs = self.runs.lock().await;
        let run = runs.get(run_id)?;

        let events = run
            .buffer
            .since(after.unwrap_or(CURSOR_NONE))
            .into_iter()
            .filter_map(|buffered| {
                let mut value = serde_json::to_value(&buffered.event).ok()?;
                value
                    .as_object_mut()?
                    .insert("event_id".to_owned(), serde_json::json!(buffered.event_id));
                Some(value)
            })
            .collect();

        Some(RunSnapshot {
            run_id: run.run_id.clone(),
            command_name: run.command_name.clone(),
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            cost_usd: run.cost_usd,
            duration_ms: run.duration_ms,
            error: run.error.clone(),
            events,
            next_cursor: run.buffer.next_cursor(),
            dropped_before: run.buffer.dropped_before(),
        })
    }

    /// Attach the driving task handle for cancellation support.
    pub async fn attach_task(&self, run_id: &str, task: JoinHandle<()>) {
        if let Some(run) = self.runs.lock().await.get_mut(run_id) {
            run.task = Some(task);
        }
    }

    /// Remove runs older than the retention horizon.
    ///
    /// A run expires on `completed_at`, or on `started_at` if it never
    /// completed. Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::TimeDelta::from_std(self.retention).unwrap_or(chrono::TimeDelta::zero());
        let mut runs = self.runs.lock().await;
        let expired: Vec<String> = runs
            .iter()
            .filter(|(_, run)| match run.completed_at {
                Some(completed_at) => completed_at < cutoff,
                None => run.started_at < cutoff,
            })
            .map(|(id, _)| id.clone())
            .collect();
        for run_id in &expired {
            if let Some(run) = runs.remove(run_id) {
                if let Some(task) = run.task {
                    task.abort();
                }
            }
        }
        drop(runs);
        if !expired.is_empty() {
            info!(count = expired.len(), "cleaned up expired command runs");
        }
        expired.len()
    }

    /// Count of runs still in `started` or `running`.
    pub async fn active_count(&self) -> usize {
        self.runs.lock().await.values().filter(|run| !run.status.is_terminal()).count()
    }

    /// Background retention sweep; one pass per minute.
    pub fn spawn_cleanup_loop(
        self: &std::sync::Arc<Self>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> JoinHandle<()> {
        let manager = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                manager.cleanup_expired().await;
            }
            info!("command run cleanup loop stopped");
        })
    }
}

#[cfg(test)]
#[path = "command_run_tests.rs"]
mod tests;
