//! Change notification over a native observer capability.
//!
//! Some environments can observe a handle and report changes beneath it as
//! batches of records with paths relative to the observed node. The notifier
//! registers such an observer, translates its records into identifier-based
//! [`FileChange`]s, and delivers them through a [`Watcher`].
//!
//! Environments without the capability still get a [`Watcher`]; it is simply
//! inactive and never yields.

use crate::error::{HandleError, ProviderError, ProviderResult};
use crate::handle::Handle;
use crate::identifier::Identifier;
use crate::resolver::HandleResolver;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Kind of a native observer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeChangeKind {
    Appeared,
    Disappeared,
    Modified,
    Moved,
    /// The observer hit an unrecoverable error and stops reporting.
    Errored,
    Unknown,
}

/// One native observer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverRecord {
    pub kind: NativeChangeKind,
    /// Path of the changed node relative to the observed handle.
    pub relative_path: Vec<String>,
    /// Previous relative path, for `Moved`.
    pub moved_from: Option<Vec<String>>,
}

impl ObserverRecord {
    pub fn new<I, S>(kind: NativeChangeKind, relative_path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            relative_path: relative_path.into_iter().map(Into::into).collect(),
            moved_from: None,
        }
    }

    pub fn moved<I, S, J, T>(from: J, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            moved_from: Some(from.into_iter().map(Into::into).collect()),
            ..Self::new(NativeChangeKind::Moved, to)
        }
    }
}

/// Where an observer delivers its record batches.
pub type RecordSink = mpsc::UnboundedSender<Vec<ObserverRecord>>;

/// A live observer registration.
pub trait ObserverRegistration: Send {
    /// Stop observing. Must be idempotent.
    fn disconnect(&mut self);
}

/// Native observer capability.
#[async_trait]
pub trait ObserverFactory: Send + Sync {
    async fn observe(
        &self,
        target: &Handle,
        recursive: bool,
        sink: RecordSink,
    ) -> Result<Box<dyn ObserverRegistration>, HandleError>;
}

/// Uniform change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    Added,
    Deleted,
    Updated,
}

/// A change to one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    pub kind: FileChangeKind,
    pub resource: Identifier,
}

/// Translate one native batch. The flag is set when the batch reports an
/// observer error.
pub fn translate_records(root: &Identifier, records: &[ObserverRecord]) -> (Vec<FileChange>, bool) {
    let mut changes = Vec::with_capacity(records.len());
    let mut errored = false;

    for record in records {
        let resource = root.join_components(&record.relative_path);
        match record.kind {
            NativeChangeKind::Appeared => changes.push(FileChange {
                kind: FileChangeKind::Added,
                resource,
            }),
            NativeChangeKind::Disappeared => changes.push(FileChange {
                kind: FileChangeKind::Deleted,
                resource,
            }),
            NativeChangeKind::Modified => changes.push(FileChange {
                kind: FileChangeKind::Updated,
                resource,
            }),
            NativeChangeKind::Moved => {
                if let Some(from) = &record.moved_from {
                    changes.push(FileChange {
                        kind: FileChangeKind::Deleted,
                        resource: root.join_components(from),
                    });
                }
                changes.push(FileChange {
                    kind: FileChangeKind::Added,
                    resource,
                });
            }
            NativeChangeKind::Errored => errored = true,
            NativeChangeKind::Unknown => trace!(path = %resource, "Ignoring unknown change record"),
        }
    }

    (changes, errored)
}

/// Subscription to changes under one identifier.
///
/// Dropping the watcher disconnects the underlying observer.
#[derive(Debug)]
pub struct Watcher {
    changes: Option<mpsc::UnboundedReceiver<Vec<FileChange>>>,
    cancel: CancellationToken,
}

impl Watcher {
    /// A watcher that never yields.
    pub fn inactive() -> Self {
        Self {
            changes: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether an observer backs this watcher.
    pub fn is_active(&self) -> bool {
        self.changes.is_some() && !self.cancel.is_cancelled()
    }

    /// Next batch of changes. `None` once the observer is gone.
    pub async fn recv(&mut self) -> Option<Vec<FileChange>> {
        self.changes.as_mut()?.recv().await
    }

    /// Disconnect the observer.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Registers observers and pumps their records into watchers.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    factory: Option<Arc<dyn ObserverFactory>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("supported", &self.is_supported())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new(factory: Option<Arc<dyn ObserverFactory>>) -> Self {
        Self { factory }
    }

    pub fn is_supported(&self) -> bool {
        self.factory.is_some()
    }

    /// Watch `id`. Without an observer capability this returns an inactive
    /// watcher.
    #[instrument(level = "debug", skip(self, resolver), fields(id = %id))]
    pub async fn watch(
        &self,
        resolver: &HandleResolver,
        id: &Identifier,
        recursive: bool,
    ) -> ProviderResult<Watcher> {
        let Some(factory) = &self.factory else {
            trace!("No observer capability, watcher is inactive");
            return Ok(Watcher::inactive());
        };

        let target = resolver
            .resolve(id)
            .await?
            .ok_or_else(|| ProviderError::not_found(id))?;

        let (record_tx, mut record_rx) = mpsc::unbounded_channel();
        let mut registration = factory
            .observe(&target, recursive, record_tx)
            .await
            .map_err(|e| ProviderError::from_handle(&e, id))?;

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let root = id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    batch = record_rx.recv() => {
                        let Some(records) = batch else { break };
                        let (changes, errored) = translate_records(&root, &records);
                        if !changes.is_empty() && change_tx.send(changes).is_err() {
                            break;
                        }
                        if errored {
                            warn!(id = %root, "Observer reported an error, disconnecting");
                            break;
                        }
                    }
                }
            }
            registration.disconnect();
            debug!(id = %root, "Observer disconnected");
        });

        Ok(Watcher {
            changes: Some(change_rx),
            cancel,
        })
    }
}
