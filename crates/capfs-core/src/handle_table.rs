//! Thread-safe table of live handles keyed by identifier.
//!
//! This is the in-memory half of the capability store: a `DashMap` from
//! [`Identifier`] to [`Handle`] shared by every concurrent operation. Reads
//! hand out clones (handles are `Arc`s), so no shard lock is held across an
//! `.await`.
//!
//! # Handle Lifecycle
//!
//! 1. **Insert**: after registration, or after a handle loaded from
//!    persistence passes its permission check
//! 2. **Get**: on every resolution, before falling back to persistence
//! 3. **Evict**: on a permission error, on removal, or at a session boundary

use crate::handle::Handle;
use crate::identifier::Identifier;
use dashmap::DashMap;

/// Concurrent identifier → handle map.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: DashMap<Identifier, Handle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle, replacing any previous one under this identifier.
    pub fn insert(&self, id: Identifier, handle: Handle) {
        self.handles.insert(id, handle);
    }

    /// Clone of the handle cached under `id`.
    pub fn get(&self, id: &Identifier) -> Option<Handle> {
        self.handles.get(id).map(|entry| entry.value().clone())
    }

    /// Remove and return the handle under `id`.
    pub fn remove(&self, id: &Identifier) -> Option<Handle> {
        self.handles.remove(id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&self) {
        self.handles.clear();
    }

    /// Snapshot of all entries, sorted by identifier.
    pub fn entries(&self) -> Vec<(Identifier, Handle)> {
        let mut entries: Vec<_> = self
            .handles
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
