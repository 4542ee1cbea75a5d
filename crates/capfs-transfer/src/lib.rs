//! Bulk transfer engine for the capability handle bridge.
//!
//! Walks trees of unknown depth and size to import external content into a
//! [`capfs_core::HandleFileSystem`] ([`Uploader`]) and to export bridge
//! content ([`Downloader`]), with cooperative cancellation, bounded
//! concurrency and coalesced progress.
//!
//! # Components
//!
//! - [`Limiter`] - admits at most N entries at a time
//! - [`TransferOperation`] - per-call counters
//! - [`ProgressAggregator`] - trailing-edge progress coalescing
//! - [`Uploader`] / [`Downloader`] - the walkers
//! - [`collaborators`] - dialogs and actions owned by the embedding
//!   application
//!
//! # Example
//!
//! ```no_run
//! use capfs_core::{Handle, HandleFileSystem, MemoryKeyValueStore};
//! use capfs_core::testing::MemoryDirectory;
//! use capfs_transfer::testing::{RecordingReporter, ScriptedConfirm};
//! use capfs_transfer::{TransferSource, Uploader};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> capfs_transfer::Result<()> {
//! let fs = Arc::new(HandleFileSystem::new(Arc::new(MemoryKeyValueStore::new())));
//! let target = fs.register(Handle::Directory(MemoryDirectory::new_root("project"))).await;
//!
//! let dropped = MemoryDirectory::new_root("drop");
//! let notes = dropped.add_file("notes.md", "# notes");
//!
//! let uploader = Uploader::new(fs, ScriptedConfirm::always(false), RecordingReporter::new());
//! let summary = uploader
//!     .upload(&target, vec![Handle::File(notes).into()], &CancellationToken::new())
//!     .await?;
//! assert_eq!(summary.files_completed, 1);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod download;
pub mod entry;
pub mod error;
pub mod limiter;
pub mod operation;
pub mod progress;
pub mod source;
pub mod testing;
pub mod upload;

pub use collaborators::{
    BlobSaver, BulkCopier, Confirm, ConfirmRequest, ConfirmResult, DirectoryPicker, Opener,
    SaveDialog,
};
pub use config::{OverwritePrompt, TransferConfig};
pub use download::{DownloadEnvironment, Downloader};
pub use entry::{EntryReport, EntryState, TransferEntry, TransferSummary};
pub use error::{Result, TransferError};
pub use limiter::{Limiter, LimiterPermit};
pub use operation::{OperationSnapshot, TransferOperation};
pub use progress::{NullReporter, ProgressAggregator, ProgressReporter, ProgressStep, format_bytes};
pub use source::{EntryReader, SourceDirectory, SourceFile, TransferSource};
pub use upload::Uploader;
