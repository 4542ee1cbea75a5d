//! Permission boundaries: session loss, revocation and denial.

mod common;

use capfs_core::{NOT_ALLOWED_MESSAGE, PermissionState};
use common::TestBridge;

#[tokio::test]
async fn test_new_session_requests_permission_once() {
    let bridge = TestBridge::new().await;
    bridge.root.add_file("a.txt", b"a".to_vec());

    bridge.fs.store().forget_session();
    bridge.root.gate().set_state(PermissionState::Prompt);
    bridge.root.gate().set_request_result(PermissionState::Granted);

    assert_eq!(bridge.fs.read_file(&bridge.id("a.txt")).await.unwrap(), "a");
    assert_eq!(bridge.fs.read_file(&bridge.id("a.txt")).await.unwrap(), "a");
    assert_eq!(bridge.root.gate().request_count(), 1);
}

#[tokio::test]
async fn test_revoked_permission_is_rechecked() {
    let bridge = TestBridge::new().await;
    bridge.root.add_file("a.txt", b"a".to_vec());

    // Revoked while the handle is cached
    bridge.root.gate().set_state(PermissionState::Prompt);
    bridge.root.gate().set_request_result(PermissionState::Prompt);

    let err = bridge.fs.readdir(&bridge.root_id).await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(err.message(), NOT_ALLOWED_MESSAGE);
    assert_eq!(bridge.root.gate().request_count(), 0);

    // The evicted handle goes through a permission request on next use
    bridge.root.gate().set_request_result(PermissionState::Granted);
    let entries = bridge.fs.readdir(&bridge.root_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(bridge.root.gate().request_count(), 1);
}

#[tokio::test]
async fn test_denied_permission_forgets_root() {
    let bridge = TestBridge::new().await;
    bridge.root.add_file("a.txt", b"a".to_vec());

    bridge.fs.store().forget_session();
    bridge.root.gate().set_state(PermissionState::Prompt);
    bridge.root.gate().set_request_result(PermissionState::Denied);

    let err = bridge.fs.stat(&bridge.root_id).await.unwrap_err();
    assert!(err.is_unavailable());
    assert!(!bridge.persisted.contains_key(bridge.root_id.as_str()));

    // Gone for good
    let err = bridge.fs.stat(&bridge.root_id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_offline_store_after_session_loss() {
    let bridge = TestBridge::new().await;
    bridge.fs.store().forget_session();
    bridge.persisted.set_unavailable(true);

    let err = bridge.fs.stat(&bridge.root_id).await.unwrap_err();
    assert!(err.is_not_found());
}
