//! Session lifecycle: TTL handling, expiry, pause/resume semantics, and
//! the workspace round-trip onto a fresh sandbox.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::{test_manager, MockRuntime};
use sandcastle::error::Error;
use sandcastle::sandbox::{Runtime, SandboxConfig};
use sandcastle::session::{CreateSessionRequest, ManagerConfig, SessionStatus};

fn request(user: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        user_id: user.to_string(),
        ..Default::default()
    }
}

fn short_ttl_config() -> ManagerConfig {
    ManagerConfig {
        default_ttl: Duration::from_secs(60 * 60),
        max_ttl: Duration::from_secs(2 * 60 * 60),
        cleanup_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_applies_defaults() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.image, "python:3.11-slim");
    assert_eq!(session.cpu_count, 2);
    assert_eq!(session.memory_mb, 2048);
    assert!(session.sandbox_id.is_none());

    // Default TTL is 24h.
    let ttl = session.expires_at - session.created_at;
    assert_eq!(ttl.num_hours(), 24);
}

#[tokio::test]
async fn test_create_requires_user() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());
    assert!(matches!(
        manager.create(CreateSessionRequest::default()).await,
        Err(Error::PreconditionFailed(_))
    ));
}

#[tokio::test]
async fn test_ttl_capped_by_max() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, short_ttl_config());

    // Three hours requested, two allowed.
    let mut req = request("u1");
    req.ttl_secs = 3 * 60 * 60;
    let session = manager.create(req).await.unwrap();
    let ttl = session.expires_at - session.created_at;
    assert!(ttl <= TimeDelta::hours(2));

    // Zero means the default.
    let session = manager.create(request("u1")).await.unwrap();
    let ttl = session.expires_at - session.created_at;
    assert_eq!(ttl.num_hours(), 1);
}

#[tokio::test]
async fn test_expired_session_reads_as_expired_then_cleanup_deletes() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    let id = session.id.clone();

    let mut expired = session;
    expired.expires_at = Utc::now() - TimeDelta::minutes(1);
    manager.update(expired).await.unwrap();

    assert!(matches!(manager.get(&id).await, Err(Error::Expired(_))));

    let removed = manager.cleanup().await.unwrap();
    assert!(removed >= 1);
    assert!(matches!(manager.get(&id).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_get_by_user_filters_expired() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());

    let live = manager.create(request("u1")).await.unwrap();
    let dead = manager.create(request("u1")).await.unwrap();
    let mut dead = dead;
    dead.expires_at = Utc::now() - TimeDelta::minutes(1);
    manager.update(dead).await.unwrap();
    manager.create(request("u2")).await.unwrap();

    let sessions = manager.get_by_user("u1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, live.id);
}

#[tokio::test]
async fn test_pause_requires_active_and_bound() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(Arc::clone(&runtime), ManagerConfig::default());

    // Unbound active session cannot pause.
    let session = manager.create(request("u1")).await.unwrap();
    assert!(matches!(
        manager.pause(&session.id).await,
        Err(Error::InvalidState(_))
    ));

    // Bound session pauses once; the second attempt sees paused state.
    let sandbox = runtime.create(&SandboxConfig::default()).await.unwrap();
    manager.bind_sandbox(&session.id, &sandbox.id).await.unwrap();
    let paused = manager.pause(&session.id).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert!(paused.sandbox_id.is_none());
    assert!(paused.paused_at.is_some());
    assert!(paused.workspace_url.is_some());

    assert!(matches!(
        manager.pause(&session.id).await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_resume_requires_paused_and_extends_expiry() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(Arc::clone(&runtime), short_ttl_config());

    let session = manager.create(request("u1")).await.unwrap();
    assert!(matches!(
        manager.resume(&session.id).await,
        Err(Error::InvalidState(_))
    ));

    let sandbox = runtime.create(&SandboxConfig::default()).await.unwrap();
    manager.bind_sandbox(&session.id, &sandbox.id).await.unwrap();
    manager.pause(&session.id).await.unwrap();

    let resumed = manager.resume(&session.id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Active);
    assert!(resumed.paused_at.is_none());
    assert!(resumed.sandbox_id.is_none());

    // Expiry restarts from the resume instant.
    let remaining = resumed.expires_at - Utc::now();
    assert!(remaining > TimeDelta::minutes(55));
    assert!(remaining <= TimeDelta::hours(1));
}

#[tokio::test]
async fn test_pause_resume_workspace_round_trip() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(Arc::clone(&runtime), ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    let first = runtime.create(&SandboxConfig::default()).await.unwrap();
    manager.bind_sandbox(&session.id, &first.id).await.unwrap();

    let files: Vec<(&str, &[u8])> = vec![
        ("/workspace/main.py", b"x = 42\n"),
        ("/workspace/data/input.csv", b"a,b\n1,2\n"),
        ("/workspace/bin/run.sh", b"#!/bin/sh\necho hi\n"),
    ];
    for (path, content) in &files {
        runtime.write_file(&first.id, path, content).await.unwrap();
    }

    manager.pause(&session.id).await.unwrap();
    runtime.destroy(&first.id).await.unwrap();

    // Resume onto a brand-new sandbox.
    manager.resume(&session.id).await.unwrap();
    let second = runtime.create(&SandboxConfig::default()).await.unwrap();
    assert_ne!(first.id, second.id);
    manager.bind_sandbox(&session.id, &second.id).await.unwrap();
    manager
        .restore_workspace(&session.id, &second.id)
        .await
        .unwrap();

    for (path, content) in &files {
        let restored = runtime.read_file(&second.id, path).await.unwrap();
        assert_eq!(&restored.as_slice(), content, "mismatch at {path}");
    }
    let listing = runtime.list_files(&second.id, "/workspace").await.unwrap();
    assert_eq!(listing.len(), files.len());
}

#[tokio::test]
async fn test_restore_without_archive_is_noop() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(Arc::clone(&runtime), ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    let sandbox = runtime.create(&SandboxConfig::default()).await.unwrap();

    // Never paused: nothing to restore, and that's fine.
    manager
        .restore_workspace(&session.id, &sandbox.id)
        .await
        .unwrap();
    let listing = runtime.list_files(&sandbox.id, "/workspace").await.unwrap();
    assert!(listing.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent_and_removes_archive() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(Arc::clone(&runtime), ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    let sandbox = runtime.create(&SandboxConfig::default()).await.unwrap();
    manager.bind_sandbox(&session.id, &sandbox.id).await.unwrap();
    runtime
        .write_file(&sandbox.id, "/workspace/keep.txt", b"data")
        .await
        .unwrap();
    manager.pause(&session.id).await.unwrap();

    manager.delete(&session.id).await.unwrap();
    assert!(matches!(
        manager.get(&session.id).await,
        Err(Error::NotFound(_))
    ));

    // Second delete: the record and archive are already gone.
    manager.delete(&session.id).await.unwrap();
}

#[tokio::test]
async fn test_touch_refreshes_last_active() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());

    let session = manager.create(request("u1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.touch(&session.id).await.unwrap();

    let fetched = manager.get(&session.id).await.unwrap();
    assert!(fetched.last_active_at > session.last_active_at);
}

#[tokio::test]
async fn test_update_preserves_metadata() {
    let runtime = MockRuntime::new();
    let (manager, _dir) = test_manager(runtime, ManagerConfig::default());

    let mut req = request("u1");
    req.metadata = HashMap::from([("project".to_string(), "grader".to_string())]);
    let session = manager.create(req).await.unwrap();

    let fetched = manager.get(&session.id).await.unwrap();
    assert_eq!(
        fetched.metadata.get("project").map(String::as_str),
        Some("grader")
    );
}
