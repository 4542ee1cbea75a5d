//! Persisted key/value collaborator for capability records.
//!
//! The bridge treats the backing store as an opaque transactional map from
//! identifier strings to handles. Work runs synchronously inside one
//! transaction; the store decides how and when it commits.
//!
//! [`MemoryKeyValueStore`] is a complete in-process implementation with
//! staged commits, used by tests and by hosts without durable storage.

use crate::error::StoreError;
use crate::handle::Handle;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::trace;

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Operations available inside a transaction.
pub trait Transaction: Send {
    fn get(&self, key: &str) -> Result<Option<Handle>, StoreError>;

    fn put(&mut self, key: &str, value: Handle) -> Result<(), StoreError>;

    fn delete(&mut self, key: &str) -> Result<(), StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;

    /// All keys, in ascending order.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Work executed inside one transaction. Results are written back through
/// captured state; an `Err` aborts the transaction.
pub type TransactionWork<'a> =
    Box<dyn FnOnce(&mut dyn Transaction) -> Result<(), StoreError> + Send + 'a>;

/// Box a closure as [`TransactionWork`].
pub fn transaction_work<'a, F>(work: F) -> TransactionWork<'a>
where
    F: FnOnce(&mut dyn Transaction) -> Result<(), StoreError> + Send + 'a,
{
    Box::new(work)
}

/// Generic transactional store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn run_in_transaction(
        &self,
        mode: TransactionMode,
        work: TransactionWork<'_>,
    ) -> Result<(), StoreError>;
}

/// In-memory store with staged commits.
///
/// Read-write work operates on a copy that replaces the committed map only
/// when the work returns `Ok`.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    records: Mutex<BTreeMap<String, Handle>>,
    fail_writes: AtomicBool,
    unavailable: AtomicBool,
    transactions: AtomicUsize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read-write transaction fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every transaction fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of transactions started so far.
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.lock().contains_key(key)
    }
}

struct StagedTransaction {
    mode: TransactionMode,
    records: BTreeMap<String, Handle>,
}

impl StagedTransaction {
    fn writable(&mut self) -> Result<&mut BTreeMap<String, Handle>, StoreError> {
        match self.mode {
            TransactionMode::ReadOnly => Err(StoreError::ReadOnly),
            TransactionMode::ReadWrite => Ok(&mut self.records),
        }
    }
}

impl Transaction for StagedTransaction {
    fn get(&self, key: &str) -> Result<Option<Handle>, StoreError> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Handle) -> Result<(), StoreError> {
        self.writable()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.writable()?.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.writable()?.clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.keys().cloned().collect())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn run_in_transaction(
        &self,
        mode: TransactionMode,
        work: TransactionWork<'_>,
    ) -> Result<(), StoreError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        if mode == TransactionMode::ReadWrite && self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }

        let mut committed = self.records.lock();
        let mut tx = StagedTransaction {
            mode,
            records: committed.clone(),
        };
        work(&mut tx)?;
        if mode == TransactionMode::ReadWrite {
            trace!(records = tx.records.len(), "Committing transaction");
            *committed = tx.records;
        }
        Ok(())
    }
}
