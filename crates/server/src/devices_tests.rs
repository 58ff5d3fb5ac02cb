// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn registry() -> (tempfile::TempDir, DeviceRegistry) {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = DeviceRegistry::new(dir.path().join("devices.json"));
    (dir, registry)
}

#[tokio::test]
async fn register_and_list() {
    let (_dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", Some("My Phone"), Some("https://relay/push/p1/s1"))
        .await
        .expect("upsert");

    let devices = registry.list(None).await.expect("list");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].installation_id, "inst-1");
    assert_eq!(devices[0].device_name.as_deref(), Some("My Phone"));
    assert_eq!(devices[0].push_url, "https://relay/push/p1/s1");
}

#[tokio::test]
async fn new_device_requires_push_url() {
    let (_dir, registry) = registry();
    let result = registry.upsert("inst-1", "iphone", None, None).await;
    assert!(result.is_err());
    assert!(registry.list(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn upsert_updates_existing_without_push_url() {
    let (_dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", None, Some("https://relay/push/p1/s1"))
        .await
        .expect("first upsert");
    registry
        .upsert("inst-1", "iphone", Some("Renamed"), None)
        .await
        .expect("rename");

    let devices = registry.list(None).await.expect("list");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_name.as_deref(), Some("Renamed"));
    // push_url survives the name-only update.
    assert_eq!(devices[0].push_url, "https://relay/push/p1/s1");
}

#[tokio::test]
async fn filter_matches_name_or_type() {
    let (_dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", Some("Phone"), Some("https://relay/push/p1/s1"))
        .await
        .expect("upsert");
    registry
        .upsert("inst-2", "mac", Some("Desk"), Some("https://relay/push/p2/s2"))
        .await
        .expect("upsert");

    assert_eq!(registry.list(Some("iphone")).await.expect("list").len(), 1);
    assert_eq!(registry.list(Some("Desk")).await.expect("list").len(), 1);
    assert_eq!(registry.list(Some("ipad")).await.expect("list").len(), 0);
}

#[tokio::test]
async fn remove_deletes_binding() {
    let (_dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", None, Some("https://relay/push/p1/s1"))
        .await
        .expect("upsert");

    assert!(registry.remove("inst-1").await.expect("remove"));
    assert!(!registry.remove("inst-1").await.expect("second remove"));
    assert!(registry.list(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn registry_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let (dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", None, Some("https://relay/push/p1/s1"))
        .await
        .expect("upsert");

    let meta = std::fs::metadata(dir.path().join("devices.json")).expect("metadata");
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
}

#[tokio::test]
async fn no_partial_file_is_left_behind() {
    let (dir, registry) = registry();
    registry
        .upsert("inst-1", "iphone", None, Some("https://relay/push/p1/s1"))
        .await
        .expect("upsert");

    // Only the final file exists; the temp file was renamed away.
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["devices.json".to_owned()]);
}
