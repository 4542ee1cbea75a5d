//! Change notification through the observer capability.

mod common;

use capfs_core::testing::MemoryDirectory;
use capfs_core::{
    FileChange, FileChangeKind, FsErrorKind, Handle, HandleFileSystem, MemoryKeyValueStore,
    NativeChangeKind, ObserverRecord, WatchOptions,
};
use common::TestBridge;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for_disconnect(bridge: &TestBridge) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.observers.active_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("Observer should disconnect");
}

#[tokio::test]
async fn test_changes_are_delivered_under_watched_identifier() {
    let bridge = TestBridge::new().await;
    let mut watcher = bridge
        .fs
        .watch(&bridge.root_id, WatchOptions { recursive: true })
        .await
        .unwrap();
    assert!(watcher.is_active());
    assert_eq!(bridge.observers.registrations(), vec![("project".to_string(), true)]);

    bridge.observers.emit(&[
        ObserverRecord::new(NativeChangeKind::Appeared, ["new.txt"]),
        ObserverRecord::new(NativeChangeKind::Modified, ["src", "lib.rs"]),
    ]);

    let batch = watcher.recv().await.expect("Should receive a batch");
    assert_eq!(
        batch,
        vec![
            FileChange {
                kind: FileChangeKind::Added,
                resource: bridge.id("new.txt"),
            },
            FileChange {
                kind: FileChangeKind::Updated,
                resource: bridge.id("src/lib.rs"),
            },
        ]
    );
}

#[tokio::test]
async fn test_move_becomes_delete_and_add() {
    let bridge = TestBridge::new().await;
    let mut watcher = bridge.fs.watch(&bridge.root_id, WatchOptions::default()).await.unwrap();

    bridge
        .observers
        .emit(&[ObserverRecord::moved(["old.txt"], ["new.txt"])]);

    let batch = watcher.recv().await.unwrap();
    let kinds: Vec<_> = batch.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![FileChangeKind::Deleted, FileChangeKind::Added]);
}

#[tokio::test]
async fn test_errored_record_disconnects() {
    let bridge = TestBridge::new().await;
    let mut watcher = bridge.fs.watch(&bridge.root_id, WatchOptions::default()).await.unwrap();

    bridge.observers.emit(&[
        ObserverRecord::new(NativeChangeKind::Disappeared, ["a.txt"]),
        ObserverRecord::new(NativeChangeKind::Errored, Vec::<String>::new()),
    ]);

    let batch = watcher.recv().await.unwrap();
    assert_eq!(batch[0].kind, FileChangeKind::Deleted);
    assert!(watcher.recv().await.is_none());
    assert_eq!(bridge.observers.active_count(), 0);
}

#[tokio::test]
async fn test_dispose_disconnects() {
    let bridge = TestBridge::new().await;
    let watcher = bridge.fs.watch(&bridge.root_id, WatchOptions::default()).await.unwrap();
    assert_eq!(bridge.observers.active_count(), 1);

    watcher.dispose();
    wait_for_disconnect(&bridge).await;
}

#[tokio::test]
async fn test_watch_missing_target() {
    let bridge = TestBridge::new().await;
    let err = bridge
        .fs
        .watch(&bridge.id("missing"), WatchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FsErrorKind::FileNotFound);
}

#[tokio::test]
async fn test_observer_failure_is_unavailable() {
    let bridge = TestBridge::new().await;
    bridge.observers.set_unsupported(true);
    let err = bridge
        .fs
        .watch(&bridge.root_id, WatchOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_without_capability_watcher_is_inactive() {
    let fs = HandleFileSystem::new(Arc::new(MemoryKeyValueStore::new()));
    let id = fs
        .register(Handle::Directory(MemoryDirectory::new_root("plain")))
        .await;
    assert!(!fs.supports_watch());

    let mut watcher = fs.watch(&id, WatchOptions::default()).await.unwrap();
    assert!(!watcher.is_active());
    assert!(watcher.recv().await.is_none());
}
