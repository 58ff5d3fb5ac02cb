// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted device bindings for push notifications.
//!
//! One JSON file `{"devices": [...]}`, one record per installation ID.
//! Writes are atomic (temp file + rename, parent directory fsynced) with
//! owner-only permissions: `push_url` is a capability URL and must never
//! leak through a partially written or world-readable file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// A registered device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub installation_id: String,
    pub device_type: String,
    #[serde(default)]
    pub device_name: Option<String>,
    pub push_url: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceFile {
    devices: Vec<DeviceRecord>,
}

/// File-backed device registry.
pub struct DeviceRegistry {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl DeviceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file_lock: Mutex::new(()) }
    }

    /// Register or update a device.
    ///
    /// `push_url` is required for a new installation; for an existing one it
    /// may be omitted to update only the name. `last_seen` always refreshes.
    pub async fn upsert(
        &self,
        installation_id: &str,
        device_type: &str,
        device_name: Option<&str>,
        push_url: Option<&str>,
    ) -> anyhow::Result<()> {
        let _guard = self.file_lock.lock().await;
        let mut file = self.load().await?;
        let now = Utc::now();

        match file.devices.iter_mut().find(|d| d.installation_id == installation_id) {
            Some(device) => {
                device.device_type = device_type.to_owned();
                if device_name.is_some() {
                    device.device_name = device_name.map(str::to_owned);
                }
                if let Some(push_url) = push_url {
                    device.push_url = push_url.to_owned();
                }
                device.last_seen = now;
            }
            None => {
                let push_url = push_url
                    .context("push_url is required to register a new device")?;
                file.devices.push(DeviceRecord {
                    installation_id: installation_id.to_owned(),
                    device_type: device_type.to_owned(),
                    device_name: device_name.map(str::to_owned),
                    push_url: push_url.to_owned(),
                    registered_at: now,
                    last_seen: now,
                });
            }
        }

        self.save(&file).await?;
        info!(installation_id = %installation_id, "device registered");
        Ok(())
    }

    /// Remove a binding. Returns whether anything was removed.
    pub async fn remove(&self, installation_id: &str) -> anyhow::Result<bool> {
        let _guard = self.file_lock.lock().await;
        let mut file = self.load().await?;
        let before = file.devices.len();
        file.devices.retain(|d| d.installation_id != installation_id);
        let removed = file.devices.len() != before;
        if removed {
            self.save(&file).await?;
            info!(installation_id = %installation_id, "device removed");
        }
        Ok(removed)
    }

    /// List bindings, optionally filtered by device name or type.
    pub async fn list(&self, filter: Option<&str>) -> anyhow::Result<Vec<DeviceRecord>> {
        let _guard = self.file_lock.lock().await;
        let file = self.load().await?;
        Ok(file
            .devices
            .into_iter()
            .filter(|d| match filter {
                Some(filter) => {
                    d.device_type == filter || d.device_name.as_deref() == Some(filter)
                }
                None => true,
            })
            .collect())
    }

    async fn load(&self) -> anyhow::Result<DeviceFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid device registry {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceFile::default()),
            Err(e) => {
                Err(e).with_context(|| format!("reading device registry {}", self.path.display()))
            }
        }
    }

    async fn save(&self, file: &DeviceFile) -> anyhow::Result<()> {
        let path = self.path.clone();
        let contents = serde_json::to_vec_pretty(file)?;
        tokio::task::spawn_blocking(move || atomic_write_secret(&path, &contents))
            .await
            .context("device registry write task failed")?
    }
}

/// Write-temp-then-rename with mode 0600 and parent directory fsync.
pub(crate) fn atomic_write_secret(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let parent = path.parent().context("target path has no parent")?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    std::fs::File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[path = "devices_tests.rs"]
mod tests;
