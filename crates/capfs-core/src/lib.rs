//! File-system bridge over capability-scoped handles.
//!
//! Sandboxed environments often grant file access only through opaque
//! handles obtained by explicit user consent: a handle can open a child by
//! name, create or remove children, enumerate, and query or request
//! permission, but it has no stable identity and no "open by path". This
//! crate builds a conventional hierarchical file system on top of that.
//!
//! # Components
//!
//! - [`Handle`] - sum type over file and directory capabilities, with the
//!   backend traits [`FileHandle`] and [`DirectoryHandle`]
//! - [`Identifier`] - synthetic path naming a handle in the bridge namespace
//! - [`CapabilityStore`] - registers handles under identifiers and keeps the
//!   mapping across sessions through a [`KeyValueStore`]
//! - [`HandleResolver`] - resolves identifiers by walking the parent chain
//! - [`HandleFileSystem`] - the facade: stat, readdir, read, write, mkdir,
//!   delete, rename, watch
//! - [`ChangeNotifier`] / [`Watcher`] - change notification where the
//!   environment offers an observer capability
//!
//! # Example
//!
//! ```no_run
//! use capfs_core::{HandleFileSystem, Handle, MemoryKeyValueStore, WriteOptions};
//! use capfs_core::testing::MemoryDirectory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), capfs_core::ProviderError> {
//! let fs = HandleFileSystem::new(Arc::new(MemoryKeyValueStore::new()));
//! let root = fs.register(Handle::Directory(MemoryDirectory::new_root("project"))).await;
//!
//! let readme = root.join("README.md");
//! fs.write_file(&readme, "hello".into(), WriteOptions::create_new()).await?;
//! assert_eq!(fs.read_file(&readme).await?, "hello");
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod error;
pub mod handle;
pub mod handle_table;
pub mod identifier;
pub mod provider;
pub mod resolver;
pub mod store;
pub mod testing;
pub mod watch;

pub use capability::CapabilityStore;
pub use error::{
    FsErrorKind, HandleError, NOT_ALLOWED_MESSAGE, ProviderError, ProviderResult, StoreError,
};
pub use handle::{
    ByteStream, DirectoryHandle, EntryStream, FileHandle, FileSnapshot, Handle, HandleBase,
    HandleKind, PermissionMode, PermissionState, WritableFileStream, probe_child,
};
pub use handle_table::HandleTable;
pub use identifier::{Identifier, split_extension};
pub use provider::{
    DeleteOptions, FileReadStream, FileStat, HandleFileSystem, READ_STREAM_HIGH_WATER_MARK,
    ReadOptions, RenameOptions, WatchOptions, WriteOptions,
};
pub use resolver::HandleResolver;
pub use store::{
    KeyValueStore, MemoryKeyValueStore, Transaction, TransactionMode, TransactionWork,
    transaction_work,
};
pub use watch::{
    ChangeNotifier, FileChange, FileChangeKind, NativeChangeKind, ObserverFactory,
    ObserverRecord, ObserverRegistration, RecordSink, Watcher,
};
