//! File-system facade over capability handles.
//!
//! [`HandleFileSystem`] offers stat/readdir/read/write/mkdir/delete/rename/
//! watch on identifiers. Every operation resolves handles through the
//! [`HandleResolver`], talks to them with per-node primitives only, and
//! translates every failure into a [`ProviderError`] carrying the identifier
//! it was about.
//!
//! # Semantics worth knowing
//!
//! - Writes are not atomic. A failed write leaves the target in an unknown
//!   state, not necessarily the previous one.
//! - `rename` is read + write + delete and only works for files.
//! - A handle that fails with a permission error is evicted from the session
//!   cache (with its ancestors) so the next access asks for permission again.

use crate::capability::CapabilityStore;
use crate::error::{HandleError, ProviderError, ProviderResult};
use crate::handle::{ByteStream, DirectoryHandle, FileHandle, Handle, HandleKind};
use crate::identifier::Identifier;
use crate::resolver::HandleResolver;
use crate::store::KeyValueStore;
use crate::watch::{ChangeNotifier, ObserverFactory, Watcher};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument, trace, warn};

/// Chunks buffered between a streaming read's producer and its consumer.
pub const READ_STREAM_HIGH_WATER_MARK: usize = 10;

/// Metadata returned by [`HandleFileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: HandleKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time (epoch for directories).
    pub mtime: SystemTime,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.kind == HandleKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == HandleKind::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub create: bool,
    pub overwrite: bool,
}

impl WriteOptions {
    /// Create if missing, replace if present.
    pub fn create_or_overwrite() -> Self {
        Self {
            create: true,
            overwrite: true,
        }
    }

    /// Only create; fail if the target exists.
    pub fn create_new() -> Self {
        Self {
            create: true,
            overwrite: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOptions {
    pub overwrite: bool,
}

/// Byte range of a streaming read. Unset fields mean "from the start" and
/// "to the end".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub position: Option<u64>,
    pub length: Option<u64>,
}

impl ReadOptions {
    fn is_partial(&self) -> bool {
        self.position.is_some() || self.length.is_some()
    }

    fn slice(&self, content: &Bytes) -> Bytes {
        let len = content.len() as u64;
        let start = self.position.unwrap_or(0).min(len);
        let end = self
            .length
            .map_or(len, |length| start.saturating_add(length).min(len));
        let (start, end) = (
            usize::try_from(start).unwrap_or(usize::MAX),
            usize::try_from(end).unwrap_or(usize::MAX),
        );
        content.slice(start..end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub recursive: bool,
}

/// Chunk stream returned by [`HandleFileSystem::read_file_stream`].
///
/// A background producer fills a bounded buffer of
/// [`READ_STREAM_HIGH_WATER_MARK`] chunks. Dropping the stream stops the
/// producer.
pub struct FileReadStream {
    chunks: mpsc::Receiver<ProviderResult<Bytes>>,
    _producer: DropGuard,
}

impl std::fmt::Debug for FileReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReadStream").finish_non_exhaustive()
    }
}

impl Stream for FileReadStream {
    type Item = ProviderResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_recv(cx)
    }
}

/// Hierarchical file system over registered handles.
#[derive(Debug)]
pub struct HandleFileSystem {
    store: Arc<CapabilityStore>,
    resolver: HandleResolver,
    notifier: ChangeNotifier,
}

impl HandleFileSystem {
    pub fn new(persisted: Arc<dyn KeyValueStore>) -> Self {
        Self::build(persisted, None)
    }

    /// Facade with change notification backed by `factory`.
    pub fn with_observer(persisted: Arc<dyn KeyValueStore>, factory: Arc<dyn ObserverFactory>) -> Self {
        Self::build(persisted, Some(factory))
    }

    fn build(persisted: Arc<dyn KeyValueStore>, factory: Option<Arc<dyn ObserverFactory>>) -> Self {
        let store = Arc::new(CapabilityStore::new(persisted));
        Self {
            resolver: HandleResolver::new(store.clone()),
            store,
            notifier: ChangeNotifier::new(factory),
        }
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    pub fn resolver(&self) -> &HandleResolver {
        &self.resolver
    }

    /// Whether `watch` can deliver changes.
    pub fn supports_watch(&self) -> bool {
        self.notifier.is_supported()
    }

    /// Register a user-granted handle and return its identifier.
    pub async fn register(&self, handle: Handle) -> Identifier {
        self.store.register(handle).await
    }

    /// Resolve `id` or fail with `FileNotFound`.
    pub async fn handle(&self, id: &Identifier) -> ProviderResult<Handle> {
        self.resolver
            .resolve(id)
            .await?
            .ok_or_else(|| ProviderError::not_found(id))
    }

    async fn file(&self, id: &Identifier) -> ProviderResult<Arc<dyn FileHandle>> {
        self.resolver
            .resolve_file(id)
            .await?
            .ok_or_else(|| ProviderError::not_found(id))
    }

    async fn directory(&self, id: &Identifier) -> ProviderResult<Arc<dyn DirectoryHandle>> {
        self.resolver
            .resolve_directory(id)
            .await?
            .ok_or_else(|| ProviderError::not_found(id))
    }

    /// Translate a handle error, evicting cached ancestors on a permission
    /// failure.
    fn fail(&self, e: &HandleError, id: &Identifier) -> ProviderError {
        if matches!(e, HandleError::NotAllowed) {
            let mut current = id.clone();
            loop {
                if self.store.evict(&current) {
                    debug!(id = %current, "Evicted handle after permission failure");
                }
                if current.is_root() {
                    break;
                }
                current = current.parent();
            }
        }
        ProviderError::from_handle(e, id)
    }

    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn stat(&self, id: &Identifier) -> ProviderResult<FileStat> {
        match self.handle(id).await? {
            Handle::File(file) => {
                let snapshot = file.snapshot().await.map_err(|e| self.fail(&e, id))?;
                Ok(FileStat {
                    kind: HandleKind::File,
                    size: snapshot.size,
                    mtime: snapshot.last_modified,
                })
            }
            Handle::Directory(_) => Ok(FileStat {
                kind: HandleKind::Directory,
                size: 0,
                mtime: SystemTime::UNIX_EPOCH,
            }),
        }
    }

    /// Whether `id` resolves to anything.
    pub async fn exists(&self, id: &Identifier) -> ProviderResult<bool> {
        Ok(self.resolver.resolve(id).await?.is_some())
    }

    /// Children of a directory as `(name, kind)`, in enumeration order.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn readdir(&self, id: &Identifier) -> ProviderResult<Vec<(String, HandleKind)>> {
        let dir = self.directory(id).await?;
        let mut entries = dir.entries().await.map_err(|e| self.fail(&e, id))?;

        let mut result = Vec::new();
        while let Some(entry) = entries.next().await {
            let handle = entry.map_err(|e| self.fail(&e, id))?;
            result.push((handle.name().to_string(), handle.kind()));
        }
        trace!(count = result.len(), "Listed directory");
        Ok(result)
    }

    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn read_file(&self, id: &Identifier) -> ProviderResult<Bytes> {
        let file = self.file(id).await?;
        file.read_all().await.map_err(|e| self.fail(&e, id))
    }

    /// Stream a file's content through a bounded buffer.
    ///
    /// Resolution errors are returned immediately; read errors arrive as
    /// stream items. Cancelling `cancel` ends the stream with a `Cancelled`
    /// error.
    #[instrument(level = "debug", skip(self, cancel), fields(id = %id))]
    pub async fn read_file_stream(
        &self,
        id: &Identifier,
        opts: ReadOptions,
        cancel: &CancellationToken,
    ) -> ProviderResult<FileReadStream> {
        let file = self.file(id).await?;
        let (tx, rx) = mpsc::channel(READ_STREAM_HIGH_WATER_MARK);
        let producer_token = cancel.child_token();
        let guard = producer_token.clone().drop_guard();
        let id = id.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = producer_token.cancelled() => {
                    let _ = tx.send(Err(ProviderError::cancelled(&id))).await;
                }
                () = produce_chunks(file, opts, &id, &tx) => {}
            }
        });

        Ok(FileReadStream {
            chunks: rx,
            _producer: guard,
        })
    }

    /// Write a whole file in one writable.
    #[instrument(level = "debug", skip(self, content), fields(id = %id, size = content.len()))]
    pub async fn write_file(
        &self,
        id: &Identifier,
        content: Bytes,
        opts: WriteOptions,
    ) -> ProviderResult<()> {
        let file = self.open_for_write(id, opts).await?;
        let mut writable = file.create_writable().await.map_err(|e| self.fail(&e, id))?;
        if let Err(e) = writable.write(content).await {
            if let Err(abort) = writable.abort().await {
                warn!(id = %id, error = %abort, "Failed to abort writable");
            }
            return Err(self.fail(&e, id));
        }
        writable.close().await.map_err(|e| self.fail(&e, id))
    }

    /// Write a file chunk by chunk into one writable. Returns the number of
    /// bytes written.
    #[instrument(level = "debug", skip(self, content, cancel), fields(id = %id))]
    pub async fn write_file_stream(
        &self,
        id: &Identifier,
        mut content: ByteStream,
        opts: WriteOptions,
        cancel: &CancellationToken,
    ) -> ProviderResult<u64> {
        let file = self.open_for_write(id, opts).await?;
        let mut writable = file.create_writable().await.map_err(|e| self.fail(&e, id))?;

        let mut written = 0u64;
        let failure = loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break Some(ProviderError::cancelled(id)),
                next = content.next() => next,
            };
            let chunk = match next {
                None => break None,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Some(self.fail(&e, id)),
            };
            let len = chunk.len() as u64;
            if let Err(e) = writable.write(chunk).await {
                break Some(self.fail(&e, id));
            }
            written += len;
            if cancel.is_cancelled() {
                break Some(ProviderError::cancelled(id));
            }
        };

        if let Some(err) = failure {
            if let Err(abort) = writable.abort().await {
                warn!(id = %id, error = %abort, "Failed to abort writable");
            }
            return Err(err);
        }
        writable.close().await.map_err(|e| self.fail(&e, id))?;
        trace!(bytes = written, "Streamed write complete");
        Ok(written)
    }

    /// Existence checks shared by both write paths, then the file handle to
    /// write into (created if needed).
    async fn open_for_write(
        &self,
        id: &Identifier,
        opts: WriteOptions,
    ) -> ProviderResult<Arc<dyn FileHandle>> {
        match self.resolver.resolve(id).await? {
            Some(Handle::File(_)) if !opts.overwrite => Err(ProviderError::exists(id)),
            Some(Handle::Directory(_)) => Err(ProviderError::exists(id)),
            Some(Handle::File(file)) => Ok(file),
            None if !opts.create => Err(ProviderError::not_found(id)),
            None => {
                let name = id.name().ok_or_else(|| ProviderError::not_found(id))?;
                let parent = self.directory(&id.parent()).await.map_err(|e| {
                    if e.is_not_found() {
                        ProviderError::not_found(id)
                    } else {
                        e
                    }
                })?;
                parent
                    .get_file_handle(name, true)
                    .await
                    .map_err(|e| self.fail(&e, id))
            }
        }
    }

    /// Create a directory. Creating an existing directory succeeds.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn mkdir(&self, id: &Identifier) -> ProviderResult<()> {
        let name = id.name().ok_or_else(|| ProviderError::exists(id))?;
        let parent = self.directory(&id.parent()).await.map_err(|e| {
            if e.is_not_found() {
                ProviderError::not_found(id)
            } else {
                e
            }
        })?;
        parent
            .get_directory_handle(name, true)
            .await
            .map(drop)
            .map_err(|e| self.fail(&e, id))
    }

    /// Remove a node through its parent.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &Identifier, opts: DeleteOptions) -> ProviderResult<()> {
        let name = id
            .name()
            .ok_or_else(|| ProviderError::unavailable(id, "Cannot delete the namespace root"))?;
        let parent_id = id.parent();
        if parent_id.is_root() {
            return Err(ProviderError::unavailable(
                id,
                "Cannot delete a registered root; remove the registration instead",
            ));
        }

        let parent = self.directory(&parent_id).await.map_err(|e| {
            if e.is_not_found() {
                ProviderError::not_found(id)
            } else {
                e
            }
        })?;
        parent
            .remove_entry(name, opts.recursive)
            .await
            .map_err(|e| self.fail(&e, id))
    }

    /// Move a file. There is no native move: the content is read, written to
    /// the target and the source deleted. Directories and registered roots
    /// are refused before anything is written.
    #[instrument(level = "debug", skip(self), fields(from = %from, to = %to))]
    pub async fn rename(
        &self,
        from: &Identifier,
        to: &Identifier,
        opts: RenameOptions,
    ) -> ProviderResult<()> {
        if from == to {
            return Ok(());
        }
        if from.parent().is_root() {
            return Err(ProviderError::unavailable(
                from,
                "Cannot move a registered root; remove the registration instead",
            ));
        }

        let file = match self.handle(from).await? {
            Handle::File(file) => file,
            Handle::Directory(_) => {
                return Err(ProviderError::unavailable(
                    from,
                    "Rename is only supported for files",
                ));
            }
        };

        let content = file.read_all().await.map_err(|e| self.fail(&e, from))?;
        self.write_file(
            to,
            content,
            WriteOptions {
                create: true,
                overwrite: opts.overwrite,
            },
        )
        .await?;
        self.delete(from, DeleteOptions::default()).await
    }

    /// Watch a node for changes.
    pub async fn watch(&self, id: &Identifier, opts: WatchOptions) -> ProviderResult<Watcher> {
        self.notifier.watch(&self.resolver, id, opts.recursive).await
    }
}

async fn produce_chunks(
    file: Arc<dyn FileHandle>,
    opts: ReadOptions,
    id: &Identifier,
    tx: &mpsc::Sender<ProviderResult<Bytes>>,
) {
    if opts.is_partial() {
        let chunk = file
            .read_all()
            .await
            .map(|content| opts.slice(&content))
            .map_err(|e| ProviderError::from_handle(&e, id));
        let _ = tx.send(chunk).await;
        return;
    }

    let mut chunks = match file.open_read().await {
        Ok(chunks) => chunks,
        Err(e) => {
            let _ = tx.send(Err(ProviderError::from_handle(&e, id))).await;
            return;
        }
    };
    while let Some(chunk) = chunks.next().await {
        let failed = chunk.is_err();
        let item = chunk.map_err(|e| ProviderError::from_handle(&e, id));
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}
