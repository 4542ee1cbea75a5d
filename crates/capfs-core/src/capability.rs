//! Capability store: stable identifiers for anonymous handles.
//!
//! Handles have no identity the bridge can address, so the store invents one
//! at registration time and remembers the mapping in two places:
//!
//! - a session cache ([`HandleTable`]) of handles already known to be usable
//! - a persisted [`KeyValueStore`] that survives sessions, holding the handle
//!   only (permission state is never persisted)
//!
//! Anything loaded from persistence passes a live permission check before it
//! is cached or returned. A handle whose permission is denied outright is
//! forgotten for good.

use crate::error::{NOT_ALLOWED_MESSAGE, ProviderError, ProviderResult, StoreError};
use crate::handle::{Handle, PermissionMode, PermissionState};
use crate::handle_table::HandleTable;
use crate::identifier::Identifier;
use crate::store::{KeyValueStore, TransactionMode, transaction_work};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace, warn};

/// Identifier ↔ handle registry.
pub struct CapabilityStore {
    cache: HandleTable,
    persisted: Arc<dyn KeyValueStore>,
    // Serializes registration so two handles racing for one name cannot
    // both claim it.
    register_lock: Mutex<()>,
}

impl std::fmt::Debug for CapabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityStore")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl CapabilityStore {
    pub fn new(persisted: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cache: HandleTable::new(),
            persisted,
            register_lock: Mutex::new(()),
        }
    }

    /// Register a handle obtained through user consent and return its
    /// identifier.
    ///
    /// Registering the same handle again returns the identifier it already
    /// has. A different handle with the same name gets a counter suffix
    /// (`notes.txt`, `notes-1.txt`, `notes-2.txt`, ...).
    #[instrument(level = "debug", skip(self, handle), fields(name = %handle.name()))]
    pub async fn register(&self, handle: Handle) -> Identifier {
        let _guard = self.register_lock.lock().await;
        let name = handle.name().to_string();

        let mut counter = 0u64;
        let id = loop {
            let candidate = if counter == 0 {
                Identifier::for_name(&name)
            } else {
                Identifier::with_counter(&name, counter)
            };

            match self.owner_of(&candidate).await {
                None => break candidate,
                Some(owner) => match owner.is_same_entry(&handle).await {
                    Ok(true) => {
                        debug!(id = %candidate, "Handle already registered");
                        self.cache.insert(candidate.clone(), handle);
                        return candidate;
                    }
                    Ok(false) => {}
                    Err(e) => trace!(id = %candidate, error = %e, "Entry comparison failed"),
                },
            }
            counter += 1;
        };

        self.cache.insert(id.clone(), handle.clone());

        let key = id.as_str().to_string();
        let result = self
            .persisted
            .run_in_transaction(
                TransactionMode::ReadWrite,
                transaction_work(move |tx| tx.put(&key, handle)),
            )
            .await;
        if let Err(e) = result {
            // The session mapping stays usable; only cross-session recall is lost.
            error!(id = %id, error = %e, "Failed to persist handle");
        }

        debug!(id = %id, "Registered handle");
        id
    }

    /// Look up a registered handle.
    ///
    /// Returns `Ok(None)` when nothing is registered under `id`, and
    /// `Unavailable` when a persisted handle exists but permission could not
    /// be obtained.
    #[instrument(level = "trace", skip(self), fields(id = %id))]
    pub async fn get(&self, id: &Identifier) -> ProviderResult<Option<Handle>> {
        if let Some(handle) = self.cache.get(id) {
            return Ok(Some(handle));
        }

        let handle = match self.load_persisted(id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to read persisted handle");
                return Ok(None);
            }
        };

        match Self::ensure_permission(&handle).await {
            PermissionState::Granted => {
                self.cache.insert(id.clone(), handle.clone());
                Ok(Some(handle))
            }
            PermissionState::Denied => {
                debug!(id = %id, "Permission denied, forgetting handle");
                self.delete_persisted(id).await;
                Err(ProviderError::unavailable(id, NOT_ALLOWED_MESSAGE))
            }
            PermissionState::Prompt => Err(ProviderError::unavailable(id, NOT_ALLOWED_MESSAGE)),
        }
    }

    /// Query permission and, if not granted, request it. Failures count as
    /// "not granted".
    async fn ensure_permission(handle: &Handle) -> PermissionState {
        match handle.query_permission(PermissionMode::ReadWrite).await {
            Ok(PermissionState::Granted) => return PermissionState::Granted,
            Ok(state) => trace!(?state, "Permission not granted yet"),
            Err(e) => warn!(error = %e, "Permission query failed"),
        }

        match handle.request_permission(PermissionMode::ReadWrite).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Permission request failed");
                PermissionState::Prompt
            }
        }
    }

    /// Forget a registration in both the session cache and persistence.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &Identifier) {
        self.cache.remove(id);
        self.delete_persisted(id).await;
    }

    /// Forget every registration.
    pub async fn clear(&self) {
        self.cache.clear();
        let result = self
            .persisted
            .run_in_transaction(TransactionMode::ReadWrite, transaction_work(|tx| tx.clear()))
            .await;
        if let Err(e) = result {
            error!(error = %e, "Failed to clear persisted handles");
        }
    }

    /// Drop the session cache. Later lookups go back through persistence and
    /// a fresh permission check.
    pub fn forget_session(&self) {
        debug!(cached = self.cache.len(), "Forgetting session handles");
        self.cache.clear();
    }

    /// Drop one cached handle so its next use re-checks permission.
    pub fn evict(&self, id: &Identifier) -> bool {
        self.cache.remove(id).is_some()
    }

    /// Identifiers of all registered directory handles, cached or persisted.
    pub async fn registered_directories(&self) -> Vec<Identifier> {
        let mut dirs: Vec<Identifier> = self
            .cache
            .entries()
            .into_iter()
            .filter(|(_, handle)| handle.is_directory())
            .map(|(id, _)| id)
            .collect();

        let mut persisted = Vec::new();
        let result = self
            .persisted
            .run_in_transaction(
                TransactionMode::ReadOnly,
                transaction_work(|tx| {
                    for key in tx.keys()? {
                        if tx.get(&key)?.is_some_and(|h| h.is_directory()) {
                            persisted.push(Identifier::new(&key));
                        }
                    }
                    Ok(())
                }),
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to list persisted handles");
        }

        dirs.extend(persisted);
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Whether `id` names a registration (cached or persisted).
    pub async fn is_registered(&self, id: &Identifier) -> bool {
        self.owner_of(id).await.is_some()
    }

    /// Current owner of an identifier without any permission check.
    async fn owner_of(&self, id: &Identifier) -> Option<Handle> {
        if let Some(handle) = self.cache.get(id) {
            return Some(handle);
        }
        match self.load_persisted(id).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to read persisted handle");
                None
            }
        }
    }

    async fn load_persisted(&self, id: &Identifier) -> Result<Option<Handle>, StoreError> {
        let mut found = None;
        self.persisted
            .run_in_transaction(
                TransactionMode::ReadOnly,
                transaction_work(|tx| {
                    found = tx.get(id.as_str())?;
                    Ok(())
                }),
            )
            .await?;
        Ok(found)
    }

    async fn delete_persisted(&self, id: &Identifier) {
        let result = self
            .persisted
            .run_in_transaction(
                TransactionMode::ReadWrite,
                transaction_work(|tx| tx.delete(id.as_str())),
            )
            .await;
        if let Err(e) = result {
            error!(id = %id, error = %e, "Failed to delete persisted handle");
        }
    }
}
