//! Download walker integration tests.

mod common;

use bytes::Bytes;
use capfs_core::testing::{
    DEFAULT_NATIVE_CHUNK, MemoryDirectory, STREAM_THRESHOLD, assert_hash_equal,
    large_file_content, sha256, small_file_content,
};
use capfs_transfer::testing::{
    FixedPicker, RecordingBlobSaver, RecordingCopier, ScriptedSaveDialog,
};
use capfs_transfer::{DownloadEnvironment, Downloader, EntryState, TransferConfig, TransferError};
use common::Bridge;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

fn downloader(bridge: &Bridge, env: DownloadEnvironment) -> Downloader {
    Downloader::new(bridge.fs.clone(), env, bridge.reporter.clone())
}

// ============================================================================
// Whole-blob fallback
// ============================================================================

#[tokio::test]
async fn test_no_picker_saves_whole_blob() {
    let bridge = Bridge::new().await;
    let big = bridge.project.add_file("big.bin", large_file_content(10));
    let saver = RecordingBlobSaver::new();

    let summary = downloader(&bridge, DownloadEnvironment::Blob(saver.clone()))
        .download(&[bridge.id("big.bin")], &CancellationToken::new())
        .await
        .unwrap();

    let blobs = saver.blobs();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].0, "big.bin");
    assert_hash_equal(&blobs[0].1, &sha256(&big.content()), "big.bin");
    assert!(saver.references().is_empty());
    assert_eq!(big.full_read_count(), 1);
    assert_eq!(big.streamed_read_count(), 0);
    assert_eq!(summary.files_completed, 1);
    assert_eq!(summary.bytes_total, Some((10 * STREAM_THRESHOLD) as u64));
    assert_eq!(summary.bytes_transferred, (10 * STREAM_THRESHOLD) as u64);
}

#[tokio::test]
async fn test_blob_over_ceiling_is_saved_by_reference() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("big.bin", large_file_content(2));
    let saver = RecordingBlobSaver::new();
    let config = TransferConfig {
        max_blob_size: STREAM_THRESHOLD as u64,
        ..TransferConfig::default()
    };

    downloader(&bridge, DownloadEnvironment::Blob(saver.clone()))
        .with_config(config)
        .download(&[bridge.id("big.bin")], &CancellationToken::new())
        .await
        .unwrap();

    assert!(saver.blobs().is_empty());
    assert_eq!(saver.references(), vec![bridge.id("big.bin")]);
}

#[tokio::test]
async fn test_unreadable_blob_is_saved_by_reference() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("locked.txt", "x").set_fail_reads(true);
    let saver = RecordingBlobSaver::new();

    let summary = downloader(&bridge, DownloadEnvironment::Blob(saver.clone()))
        .download(&[bridge.id("locked.txt")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(saver.references(), vec![bridge.id("locked.txt")]);
    assert_eq!(summary.files_completed, 1);
}

#[tokio::test]
async fn test_blob_skips_folders() {
    let bridge = Bridge::new().await;
    bridge.project.add_dir("docs").add_file("a.txt", "a");
    bridge.project.add_file("b.txt", "b");
    let saver = RecordingBlobSaver::new();

    let summary = downloader(&bridge, DownloadEnvironment::Blob(saver.clone()))
        .download(
            &[bridge.id("docs"), bridge.id("b.txt")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.entry(&bridge.id("docs")).unwrap().state, EntryState::Skipped);
    assert_eq!(saver.blobs(), vec![("b.txt".to_string(), Bytes::from("b"))]);
    assert_eq!(summary.files_total, 1);
    assert_eq!(summary.files_completed, 1);
    assert_eq!(summary.bytes_total, None);
}

// ============================================================================
// Handle-based mirror
// ============================================================================

#[tokio::test]
async fn test_picked_folder_streams_large_file() {
    let bridge = Bridge::new().await;
    let big = bridge.project.add_file("big.bin", large_file_content(10));
    let dest = MemoryDirectory::new_root("downloads");
    let picker = FixedPicker::new(dest.clone());

    let summary = downloader(&bridge, DownloadEnvironment::Handles(picker.clone()))
        .download(&[bridge.id("big.bin")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(picker.calls(), 1);
    assert_eq!(summary.files_completed, 1);
    let copy = dest.file("big.bin").expect("Mirrored file");
    assert_hash_equal(&copy.content(), &sha256(&big.content()), "big.bin");
    assert_eq!(copy.commit_count(), 1);
    assert_eq!(big.streamed_read_count(), 1);
    assert_eq!(big.full_read_count(), 0);

    let chunks = copy.write_chunk_sizes();
    assert_eq!(chunks.len(), 10 * STREAM_THRESHOLD / DEFAULT_NATIVE_CHUNK);
    assert!(chunks.iter().all(|&len| len < 10 * STREAM_THRESHOLD));
}

#[tokio::test]
async fn test_picked_folder_buffers_small_file() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("small.txt", small_file_content());
    let dest = MemoryDirectory::new_root("downloads");

    downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::new(dest.clone())))
        .download(&[bridge.id("small.txt")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dest.file("small.txt").unwrap().write_chunk_sizes(), vec![2048]);
}

#[tokio::test]
async fn test_picked_files_know_their_byte_total() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "alpha");
    bridge.project.add_file("big.bin", large_file_content(2));
    let dest = MemoryDirectory::new_root("downloads");

    let summary = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::new(dest.clone())))
        .download(
            &[bridge.id("a.txt"), bridge.id("big.bin")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let expected = 5 + (2 * STREAM_THRESHOLD) as u64;
    assert_eq!(summary.bytes_total, Some(expected));
    assert_eq!(summary.bytes_transferred, expected);

    let small = summary.entry(&bridge.id("a.txt")).unwrap();
    assert_eq!(small.entry.size, Some(5));
    assert!(!small.is_directory());
}

#[tokio::test]
async fn test_picked_folder_mirrors_tree() {
    let bridge = Bridge::new().await;
    let docs = bridge.project.add_dir("docs");
    docs.add_file("a.txt", "alpha");
    docs.add_dir("nested").add_file("b.txt", "beta");
    let dest = MemoryDirectory::new_root("downloads");

    let summary = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::new(dest.clone())))
        .download(&[bridge.id("docs")], &CancellationToken::new())
        .await
        .unwrap();

    // docs, a.txt, nested, b.txt
    assert_eq!(summary.files_total, 4);
    assert_eq!(summary.files_completed, 4);
    assert_eq!(summary.bytes_total, None);
    assert_eq!(summary.bytes_transferred, 9);
    assert_eq!(dest.file_at("docs/a.txt").unwrap().content(), Bytes::from("alpha"));
    assert_eq!(
        dest.file_at("docs/nested/b.txt").unwrap().content(),
        Bytes::from("beta")
    );
}

#[tokio::test]
async fn test_dismissed_picker_cancels_download() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "a");

    let err = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::dismissed()))
        .download(&[bridge.id("a.txt")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_failing_picker_aborts_download() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "a");

    let err = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::failing()))
        .download(&[bridge.id("a.txt")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Collaborator { .. }));
}

#[tokio::test]
async fn test_missing_source_is_reported_failed() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "a");
    let dest = MemoryDirectory::new_root("downloads");

    let summary = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::new(dest.clone())))
        .download(
            &[bridge.id("gone.txt"), bridge.id("a.txt")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.entry(&bridge.id("gone.txt")).unwrap().state, EntryState::Failed);
    assert_eq!(summary.entry(&bridge.id("a.txt")).unwrap().state, EntryState::Completed);
    assert_eq!(dest.child_names(), vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn test_cancelled_download_writes_nothing() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "a");
    bridge.project.add_dir("docs").add_file("b.txt", "b");
    let dest = MemoryDirectory::new_root("downloads");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = downloader(&bridge, DownloadEnvironment::Handles(FixedPicker::new(dest.clone())))
        .download(&[bridge.id("a.txt"), bridge.id("docs")], &cancel)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.entries.is_empty());
    assert!(dest.child_names().is_empty());
}

// ============================================================================
// Native delegation
// ============================================================================

#[tokio::test]
async fn test_native_prompts_then_copies() {
    let bridge = Bridge::new().await;
    bridge.project.add_file("a.txt", "a");
    bridge.project.add_file("b.txt", "b");
    let dialog = ScriptedSaveDialog::new(vec![
        Some(PathBuf::from("/home/me/Downloads/a.txt")),
        Some(PathBuf::from("/home/me/Downloads/b.txt")),
    ]);
    let copier = RecordingCopier::new();
    let env = DownloadEnvironment::Native {
        dialog: dialog.clone(),
        copier: copier.clone(),
    };
    let engine = downloader(&bridge, env);

    let summary = engine
        .download(&[bridge.id("a.txt"), bridge.id("b.txt")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.files_completed, 2);
    assert_eq!(
        copier.copies(),
        vec![
            (bridge.id("a.txt"), PathBuf::from("/home/me/Downloads/a.txt")),
            (bridge.id("b.txt"), PathBuf::from("/home/me/Downloads/b.txt")),
        ]
    );
    let prompts = dialog.prompts();
    assert_eq!(prompts[0], (None, "a.txt".to_string()));
    assert_eq!(
        prompts[1],
        (Some(PathBuf::from("/home/me/Downloads")), "b.txt".to_string())
    );
    assert_eq!(engine.last_download_dir(), Some(PathBuf::from("/home/me/Downloads")));
}

#[tokio::test]
async fn test_native_dialog_cancel_stops_remaining() {
    let bridge = Bridge::new().await;
    for name in ["a.txt", "b.txt", "c.txt"] {
        bridge.project.add_file(name, name);
    }
    let dialog = ScriptedSaveDialog::new(vec![Some(PathBuf::from("/tmp/out/a.txt")), None]);
    let copier = RecordingCopier::new();
    let env = DownloadEnvironment::Native {
        dialog: dialog.clone(),
        copier: copier.clone(),
    };

    let summary = downloader(&bridge, env)
        .download(
            &[bridge.id("a.txt"), bridge.id("b.txt"), bridge.id("c.txt")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(copier.copies().len(), 1);
    assert_eq!(dialog.prompts().len(), 2);
    assert_eq!(summary.files_completed, 1);
}
