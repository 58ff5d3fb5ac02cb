// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent agent identity.
//!
//! One JSON file under the data directory, created on first startup and
//! refreshed (`last_loaded`) on every load. Same atomic 0600 write pattern
//! as the device registry.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::devices::atomic_write_secret;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub prime_agent_id: String,
    pub created_at: String,
    pub last_loaded: String,
}

fn identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join("agent").join("identity.json")
}

fn generate_agent_id() -> String {
    format!("agent_{}", &uuid::Uuid::new_v4().simple().to_string()[..16])
}

/// Load the persisted identity, or create and persist a new one.
///
/// A corrupt identity file is replaced with a fresh identity rather than
/// failing startup.
pub async fn load_or_create(data_dir: &Path) -> anyhow::Result<AgentIdentity> {
    let path = identity_path(data_dir);
    let now = Utc::now().to_rfc3339();

    let mut identity = match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice::<AgentIdentity>(&bytes) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(path = %path.display(), err = %e, "invalid agent identity file, regenerating");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(e).with_context(|| format!("reading identity {}", path.display()));
        }
    };

    let created = identity.is_none();
    let identity = match identity.take() {
        Some(mut identity) => {
            identity.last_loaded = now;
            identity
        }
        None => AgentIdentity {
            prime_agent_id: generate_agent_id(),
            created_at: now.clone(),
            last_loaded: now,
        },
    };

    let contents = serde_json::to_vec_pretty(&identity)?;
    let write_path = path.clone();
    tokio::task::spawn_blocking(move || atomic_write_secret(&write_path, &contents))
        .await
        .context("identity write task failed")??;

    if created {
        info!(prime_agent_id = %identity.prime_agent_id, "new agent identity created");
    } else {
        info!(prime_agent_id = %identity.prime_agent_id, "agent identity loaded");
    }
    Ok(identity)
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
