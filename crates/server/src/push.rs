// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push notification fan-out through the relay.
//!
//! Each device binding carries an opaque capability URL; the relay accepts a
//! plain JSON POST on it.  The URL embeds a secret path segment, so logs only
//! ever carry the non-secret push ID prefix.  HTTP 410 from the relay means
//! the binding is dead and is removed from the registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::devices::DeviceRegistry;

/// Relay delivery failure.
#[derive(Debug)]
pub enum RelayError {
    /// Non-success HTTP status from the relay.
    Status { code: u16, message: String },
    /// Connection / timeout / protocol failure.
    Transport(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { code, message } => write!(f, "relay returned {code}: {message}"),
            Self::Transport(message) => write!(f, "relay transport error: {message}"),
        }
    }
}

impl std::error::Error for RelayError {}

/// The non-secret push ID segment of a capability URL, for log correlation.
///
/// URL shape: `https://relay.example/push/{push_id}/{push_secret}`.
pub fn push_id_prefix(push_url: &str) -> &str {
    let mut segments = push_url.trim_end_matches('/').rsplit('/');
    segments.next();
    segments.next().unwrap_or("unknown")
}

/// HTTP client for the push relay.
pub struct RelayClient {
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// POST a notification to a capability URL.
    ///
    /// Returns whether the relay queued it.
    pub async fn send_push(
        &self,
        push_url: &str,
        title: &str,
        body: &str,
        data: Option<&serde_json::Value>,
    ) -> Result<bool, RelayError> {
        let mut payload = serde_json::json!({"title": title, "body": body});
        if let Some(data) = data {
            payload["data"] = data.clone();
        }

        let push_id = push_id_prefix(push_url);
        debug!(push_id = %push_id, title = %title, "sending push notification");

        let response = self
            .http
            .post(push_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = response.status();
        info!(push_id = %push_id, status = status.as_u16(), "push notification sent");
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Status { code: status.as_u16(), message });
        }

        let result: serde_json::Value =
            response.json().await.map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(result.get("queued").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

/// Result for one device in a fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceResult {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated fan-out result.
#[derive(Debug, Clone, Serialize)]
pub struct PushSummary {
    pub sent: usize,
    pub failed: usize,
    pub invalid_tokens_removed: usize,
    pub devices: Vec<DeviceResult>,
}

/// Device lookup plus relay delivery.
pub struct PushService {
    devices: Arc<DeviceRegistry>,
    relay: RelayClient,
}

impl PushService {
    pub fn new(devices: Arc<DeviceRegistry>, relay: RelayClient) -> Self {
        Self { devices, relay }
    }

    /// Fan a notification out to every binding matching `device_filter`.
    ///
    /// One failing device never stops the rest; 410 removes the binding.
    pub async fn send_notification(
        &self,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        device_filter: Option<&str>,
    ) -> anyhow::Result<PushSummary> {
        let devices = self.devices.list(device_filter).await?;
        if devices.is_empty() {
            info!(device_filter = ?device_filter, "no registered devices for push notification");
            return Ok(PushSummary {
                sent: 0,
                failed: 0,
                invalid_tokens_removed: 0,
                devices: vec![],
            });
        }

        let mut sent = 0;
        let mut failed = 0;
        let mut invalid_tokens_removed = 0;
        let mut results = Vec::with_capacity(devices.len());

        for device in devices {
            let name = device.device_name.clone().unwrap_or_else(|| device.device_type.clone());
            match self.relay.send_push(&device.push_url, title, body, data.as_ref()).await {
                Ok(true) => {
                    sent += 1;
                    results.push(DeviceResult {
                        name,
                        status: "sent".to_owned(),
                        error: None,
                    });
                }
                Ok(false) => {
                    failed += 1;
                    results.push(DeviceResult {
                        name,
                        status: "failed".to_owned(),
                        error: Some("Not queued".to_owned()),
                    });
                }
                Err(RelayError::Status { code: 410, .. }) => {
                    let _ = self.devices.remove(&device.installation_id).await;
                    invalid_tokens_removed += 1;
                    results.push(DeviceResult {
                        name,
                        status: "invalid_binding".to_owned(),
                        error: Some("Binding no longer valid (removed)".to_owned()),
                    });
                    info!(
                        installation_id = %device.installation_id,
                        "device removed due to invalid binding"
                    );
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        installation_id = %device.installation_id,
                        err = %e,
                        "failed to send to device"
                    );
                    results.push(DeviceResult {
                        name,
                        status: "failed".to_owned(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(sent, failed, invalid_tokens_removed, "push notification send completed");
        Ok(PushSummary { sent, failed, invalid_tokens_removed, devices: results })
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
