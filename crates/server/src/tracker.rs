// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outcome tracking for background tasks.
//!
//! Background work (capture sync, post-run sync, periodic pull, offline
//! push) never propagates errors to its spawner; failures land here so the
//! monitoring endpoint can surface them instead of letting them vanish.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::error;

/// A failed background task record.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub task: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Monitoring snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Default)]
struct TrackerInner {
    successes: VecDeque<(String, DateTime<Utc>)>,
    failures: VecDeque<FailureRecord>,
}

/// Bounded history of background task outcomes.
pub struct BackgroundTaskTracker {
    inner: Mutex<TrackerInner>,
    max_history: usize,
}

impl BackgroundTaskTracker {
    pub fn new(max_history: usize) -> Self {
        Self { inner: Mutex::new(TrackerInner::default()), max_history }
    }

    pub async fn record_success(&self, task: &str) {
        let mut inner = self.inner.lock().await;
        inner.successes.push_back((task.to_owned(), Utc::now()));
        while inner.successes.len() > self.max_history {
            inner.successes.pop_front();
        }
    }

    pub async fn record_failure(&self, task: &str, err: &anyhow::Error) {
        error!(task = %task, err = %format!("{err:#}"), "background task failed");
        let mut inner = self.inner.lock().await;
        inner.failures.push_back(FailureRecord {
            task: task.to_owned(),
            error: format!("{err:#}"),
            timestamp: Utc::now(),
        });
        while inner.failures.len() > self.max_history {
            inner.failures.pop_front();
        }
    }

    /// Snapshot with the last five failures.
    pub async fn status(&self) -> TrackerStatus {
        let inner = self.inner.lock().await;
        TrackerStatus {
            successful_tasks: inner.successes.len(),
            failed_tasks: inner.failures.len(),
            recent_failures: inner.failures.iter().rev().take(5).rev().cloned().collect(),
        }
    }
}

impl Default for BackgroundTaskTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
