//! Shared harness for transfer integration tests.

#![allow(dead_code)]

use capfs_core::testing::{MemoryDirectory, MemoryOptions};
use capfs_core::{Handle, HandleFileSystem, Identifier, MemoryKeyValueStore};
use capfs_transfer::testing::RecordingReporter;
use std::sync::Arc;

/// Native chunk size of external sources in tests (smaller than any large
/// file, so streamed writes are observable as many chunks).
pub const SOURCE_CHUNK: usize = 256 * 1024;

/// A bridge with one registered in-memory project folder.
pub struct Bridge {
    pub fs: Arc<HandleFileSystem>,
    pub project: Arc<MemoryDirectory>,
    pub project_id: Identifier,
    pub reporter: Arc<RecordingReporter>,
}

impl Bridge {
    pub async fn new() -> Self {
        let fs = Arc::new(HandleFileSystem::new(Arc::new(MemoryKeyValueStore::new())));
        let project = MemoryDirectory::new_root("project");
        let project_id = fs.register(Handle::Directory(project.clone())).await;
        Self {
            fs,
            project,
            project_id,
            reporter: RecordingReporter::new(),
        }
    }

    /// Identifier of a path relative to the project folder.
    pub fn id(&self, relative: &str) -> Identifier {
        self.project_id.join(relative)
    }
}

/// An external folder to upload from.
pub fn external_folder(name: &str) -> Arc<MemoryDirectory> {
    MemoryDirectory::with_options(
        name,
        MemoryOptions {
            chunk_size: SOURCE_CHUNK,
            ..MemoryOptions::default()
        },
    )
}
