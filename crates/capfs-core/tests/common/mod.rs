//! Shared harness for bridge integration tests.

#![allow(dead_code)]

use capfs_core::testing::{MemoryDirectory, MemoryObserverFactory, MemoryOptions};
use capfs_core::{Handle, HandleFileSystem, Identifier, MemoryKeyValueStore};
use std::sync::Arc;

/// A facade with one registered in-memory root directory.
pub struct TestBridge {
    pub fs: HandleFileSystem,
    pub persisted: Arc<MemoryKeyValueStore>,
    pub root: Arc<MemoryDirectory>,
    pub root_id: Identifier,
    pub observers: Arc<MemoryObserverFactory>,
}

impl TestBridge {
    pub async fn new() -> Self {
        Self::with_options(MemoryOptions::default()).await
    }

    pub async fn with_options(options: MemoryOptions) -> Self {
        let persisted = Arc::new(MemoryKeyValueStore::new());
        let observers = MemoryObserverFactory::new();
        let fs = HandleFileSystem::with_observer(persisted.clone(), observers.clone());
        let root = MemoryDirectory::with_options("project", options);
        let root_id = fs.register(Handle::Directory(root.clone())).await;
        Self {
            fs,
            persisted,
            root,
            root_id,
            observers,
        }
    }

    /// Identifier of a path relative to the root.
    pub fn id(&self, relative: &str) -> Identifier {
        self.root_id.join(relative)
    }
}
