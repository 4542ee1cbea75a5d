//! In-memory handle backend.
//!
//! Behaves like a sandboxed handle environment: every operation checks a
//! shared [`PermissionGate`], children are opened by name, files stream in a
//! fixed native chunk size, and writes only land when the writable is closed.
//! Counters expose what the bridge did so tests can assert on it.

use crate::error::HandleError;
use crate::handle::{
    ByteStream, DirectoryHandle, EntryStream, FileHandle, FileSnapshot, Handle, HandleBase,
    PermissionMode, PermissionState, WritableFileStream, probe_child,
};
use crate::watch::{ObserverFactory, ObserverRecord, ObserverRegistration, RecordSink};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;

/// Native chunk size of files created without explicit options.
pub const DEFAULT_NATIVE_CHUNK: usize = 64 * 1024;

/// Permission state shared by a root handle and everything beneath it.
#[derive(Debug)]
pub struct PermissionGate {
    state: Mutex<PermissionState>,
    request_result: Mutex<PermissionState>,
    queries: AtomicUsize,
    requests: AtomicUsize,
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self {
            state: Mutex::new(PermissionState::Granted),
            request_result: Mutex::new(PermissionState::Granted),
            queries: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }
}

impl PermissionGate {
    pub fn state(&self) -> PermissionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: PermissionState) {
        *self.state.lock() = state;
    }

    /// What the next permission request answers (and switches to).
    pub fn set_request_result(&self, result: PermissionState) {
        *self.request_result.lock() = result;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), HandleError> {
        match self.state() {
            PermissionState::Granted => Ok(()),
            PermissionState::Denied | PermissionState::Prompt => Err(HandleError::NotAllowed),
        }
    }

    fn query(&self) -> PermissionState {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.state()
    }

    fn request(&self) -> PermissionState {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let result = *self.request_result.lock();
        if result != PermissionState::Prompt {
            self.set_state(result);
        }
        result
    }
}

/// Backend-wide behavior switches.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Size of the chunks `open_read` yields.
    pub chunk_size: usize,
    /// Resolve `lookup` by trying a file then a directory instead of a direct
    /// existence check.
    pub fallback_lookup: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_NATIVE_CHUNK,
            fallback_lookup: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Child {
    File(Arc<MemoryFile>),
    Directory(Arc<MemoryDirectory>),
}

impl Child {
    fn to_handle(&self) -> Handle {
        match self {
            Child::File(f) => Handle::File(f.clone()),
            Child::Directory(d) => Handle::Directory(d.clone()),
        }
    }
}

/// In-memory directory node.
#[derive(Debug)]
pub struct MemoryDirectory {
    name: String,
    children: Mutex<BTreeMap<String, Child>>,
    gate: Arc<PermissionGate>,
    options: Arc<MemoryOptions>,
    fail_lookups: AtomicBool,
    typed_gets: AtomicUsize,
}

impl MemoryDirectory {
    /// New root directory with its own permission gate.
    pub fn new_root(name: &str) -> Arc<Self> {
        Self::with_options(name, MemoryOptions::default())
    }

    pub fn with_options(name: &str, options: MemoryOptions) -> Arc<Self> {
        Arc::new(Self::node(
            name,
            Arc::new(PermissionGate::default()),
            Arc::new(options),
        ))
    }

    fn node(name: &str, gate: Arc<PermissionGate>, options: Arc<MemoryOptions>) -> Self {
        Self {
            name: name.to_string(),
            children: Mutex::new(BTreeMap::new()),
            gate,
            options,
            fail_lookups: AtomicBool::new(false),
            typed_gets: AtomicUsize::new(0),
        }
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    /// Add (or replace) a file child.
    pub fn add_file(&self, name: &str, content: impl Into<Bytes>) -> Arc<MemoryFile> {
        let file = Arc::new(MemoryFile::node(
            name,
            content.into(),
            self.gate.clone(),
            self.options.chunk_size,
        ));
        self.children
            .lock()
            .insert(name.to_string(), Child::File(file.clone()));
        file
    }

    /// Add a directory child, or return the existing one.
    pub fn add_dir(&self, name: &str) -> Arc<MemoryDirectory> {
        let mut children = self.children.lock();
        if let Some(Child::Directory(dir)) = children.get(name) {
            return dir.clone();
        }
        let dir = Arc::new(Self::node(name, self.gate.clone(), self.options.clone()));
        children.insert(name.to_string(), Child::Directory(dir.clone()));
        dir
    }

    pub fn file(&self, name: &str) -> Option<Arc<MemoryFile>> {
        match self.children.lock().get(name) {
            Some(Child::File(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn dir(&self, name: &str) -> Option<Arc<MemoryDirectory>> {
        match self.children.lock().get(name) {
            Some(Child::Directory(d)) => Some(d.clone()),
            _ => None,
        }
    }

    /// File at a `/`-separated relative path.
    pub fn file_at(&self, path: &str) -> Option<Arc<MemoryFile>> {
        let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let file_name = parts.pop()?;
        let mut current: Option<Arc<MemoryDirectory>> = None;
        for part in parts {
            current = Some(match &current {
                None => self.dir(part)?,
                Some(dir) => dir.dir(part)?,
            });
        }
        match current {
            None => self.file(file_name),
            Some(dir) => dir.file(file_name),
        }
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.lock().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.lock().contains_key(name)
    }

    /// Make every lookup in this directory fail.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_*_handle` calls without create that reached the backend.
    pub fn typed_get_count(&self) -> usize {
        self.typed_gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandleBase for MemoryDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_permission(&self, _mode: PermissionMode) -> Result<PermissionState, HandleError> {
        Ok(self.gate.query())
    }

    async fn request_permission(
        &self,
        _mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        Ok(self.gate.request())
    }

    async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError> {
        Ok(other
            .as_any()
            .downcast_ref::<MemoryDirectory>()
            .is_some_and(|o| std::ptr::eq(self, o)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl DirectoryHandle for MemoryDirectory {
    async fn get_file_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn FileHandle>, HandleError> {
        self.gate.check()?;
        if !create {
            self.typed_gets.fetch_add(1, Ordering::SeqCst);
        }
        let existing = self.children.lock().get(name).cloned();
        match existing {
            Some(Child::File(f)) => Ok(f),
            Some(Child::Directory(_)) => Err(HandleError::TypeMismatch {
                name: name.to_string(),
            }),
            None if create => Ok(self.add_file(name, Bytes::new())),
            None => Err(HandleError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn DirectoryHandle>, HandleError> {
        self.gate.check()?;
        if !create {
            self.typed_gets.fetch_add(1, Ordering::SeqCst);
        }
        let existing = self.children.lock().get(name).cloned();
        match existing {
            Some(Child::Directory(d)) => Ok(d),
            Some(Child::File(_)) => Err(HandleError::TypeMismatch {
                name: name.to_string(),
            }),
            None if create => Ok(self.add_dir(name)),
            None => Err(HandleError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), HandleError> {
        self.gate.check()?;
        let mut children = self.children.lock();
        match children.get(name) {
            None => {
                return Err(HandleError::NotFound {
                    name: name.to_string(),
                });
            }
            Some(Child::Directory(d)) if !recursive && !d.children.lock().is_empty() => {
                return Err(HandleError::InvalidModification(format!(
                    "directory '{name}' is not empty"
                )));
            }
            Some(_) => {}
        }
        children.remove(name);
        Ok(())
    }

    async fn entries(&self) -> Result<EntryStream, HandleError> {
        self.gate.check()?;
        let handles: Vec<Result<Handle, HandleError>> = self
            .children
            .lock()
            .values()
            .map(|child| Ok(child.to_handle()))
            .collect();
        Ok(stream::iter(handles).boxed())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Handle>, HandleError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(HandleError::Io(format!("lookup of '{name}' failed")));
        }
        if self.options.fallback_lookup {
            return probe_child(self, name).await;
        }
        self.gate.check()?;
        Ok(self.children.lock().get(name).map(Child::to_handle))
    }
}

#[derive(Debug)]
struct FileState {
    content: Mutex<Bytes>,
    modified: Mutex<SystemTime>,
    commits: AtomicUsize,
    full_reads: AtomicUsize,
    streamed_reads: AtomicUsize,
    write_chunks: Mutex<Vec<usize>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

/// In-memory file node.
#[derive(Debug)]
pub struct MemoryFile {
    name: String,
    state: Arc<FileState>,
    gate: Arc<PermissionGate>,
    chunk_size: usize,
}

impl MemoryFile {
    /// A file handle that lives outside any directory (e.g. a picked file).
    pub fn new_detached(name: &str, content: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self::node(
            name,
            content.into(),
            Arc::new(PermissionGate::default()),
            DEFAULT_NATIVE_CHUNK,
        ))
    }

    fn node(name: &str, content: Bytes, gate: Arc<PermissionGate>, chunk_size: usize) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(FileState {
                content: Mutex::new(content),
                modified: Mutex::new(SystemTime::now()),
                commits: AtomicUsize::new(0),
                full_reads: AtomicUsize::new(0),
                streamed_reads: AtomicUsize::new(0),
                write_chunks: Mutex::new(Vec::new()),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }),
            gate,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    pub fn content(&self) -> Bytes {
        self.state.content.lock().clone()
    }

    /// Number of writables closed on this file.
    pub fn commit_count(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    /// Number of `read_all` calls.
    pub fn full_read_count(&self) -> usize {
        self.state.full_reads.load(Ordering::SeqCst)
    }

    /// Number of `open_read` calls.
    pub fn streamed_read_count(&self) -> usize {
        self.state.streamed_reads.load(Ordering::SeqCst)
    }

    /// Sizes of every chunk written through committed writables.
    pub fn write_chunk_sizes(&self) -> Vec<usize> {
        self.state.write_chunks.lock().clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_readable(&self) -> Result<(), HandleError> {
        self.gate.check()?;
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(HandleError::Io(format!("read of '{}' failed", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl HandleBase for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_permission(&self, _mode: PermissionMode) -> Result<PermissionState, HandleError> {
        Ok(self.gate.query())
    }

    async fn request_permission(
        &self,
        _mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        Ok(self.gate.request())
    }

    async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError> {
        Ok(other
            .as_any()
            .downcast_ref::<MemoryFile>()
            .is_some_and(|o| Arc::ptr_eq(&self.state, &o.state)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl FileHandle for MemoryFile {
    async fn snapshot(&self) -> Result<FileSnapshot, HandleError> {
        self.gate.check()?;
        Ok(FileSnapshot {
            size: self.state.content.lock().len() as u64,
            last_modified: *self.state.modified.lock(),
        })
    }

    async fn read_all(&self) -> Result<Bytes, HandleError> {
        self.check_readable()?;
        self.state.full_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.content())
    }

    async fn open_read(&self) -> Result<ByteStream, HandleError> {
        self.check_readable()?;
        self.state.streamed_reads.fetch_add(1, Ordering::SeqCst);
        let content = self.content();
        let chunk_size = self.chunk_size;
        let chunks: Vec<Result<Bytes, HandleError>> = (0..content.len())
            .step_by(chunk_size)
            .map(|start| Ok(content.slice(start..(start + chunk_size).min(content.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn create_writable(&self) -> Result<Box<dyn WritableFileStream>, HandleError> {
        self.gate.check()?;
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(HandleError::Io(format!("'{}' is not writable", self.name)));
        }
        Ok(Box::new(MemoryWritable {
            state: self.state.clone(),
            buffer: Vec::new(),
            chunks: Vec::new(),
        }))
    }
}

struct MemoryWritable {
    state: Arc<FileState>,
    buffer: Vec<u8>,
    chunks: Vec<usize>,
}

#[async_trait]
impl WritableFileStream for MemoryWritable {
    async fn write(&mut self, data: Bytes) -> Result<(), HandleError> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(HandleError::Io("write failed".to_string()));
        }
        self.chunks.push(data.len());
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), HandleError> {
        let this = *self;
        *this.state.content.lock() = Bytes::from(this.buffer);
        *this.state.modified.lock() = SystemTime::now();
        this.state.write_chunks.lock().extend(this.chunks);
        this.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), HandleError> {
        Ok(())
    }
}

struct MemoryRegistration {
    active: Arc<AtomicBool>,
}

impl ObserverRegistration for MemoryRegistration {
    fn disconnect(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Subscription {
    target: String,
    recursive: bool,
    sink: RecordSink,
    active: Arc<AtomicBool>,
}

/// Observer capability whose records are injected by the test.
#[derive(Debug, Default)]
pub struct MemoryObserverFactory {
    subscriptions: Mutex<Vec<Subscription>>,
    unsupported: AtomicBool,
}

impl MemoryObserverFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `observe` fail as if the target could not be observed.
    pub fn set_unsupported(&self, unsupported: bool) {
        self.unsupported.store(unsupported, Ordering::SeqCst);
    }

    /// Deliver a batch to every connected observer. Returns how many
    /// observers received it.
    pub fn emit(&self, records: &[ObserverRecord]) -> usize {
        let subscriptions = self.subscriptions.lock();
        subscriptions
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .filter(|s| s.sink.send(records.to_vec()).is_ok())
            .count()
    }

    /// Number of observers still connected.
    pub fn active_count(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    /// `(target name, recursive)` for every observer ever registered.
    pub fn registrations(&self) -> Vec<(String, bool)> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| (s.target.clone(), s.recursive))
            .collect()
    }
}

#[async_trait]
impl ObserverFactory for MemoryObserverFactory {
    async fn observe(
        &self,
        target: &Handle,
        recursive: bool,
        sink: RecordSink,
    ) -> Result<Box<dyn ObserverRegistration>, HandleError> {
        if self.unsupported.load(Ordering::SeqCst) {
            return Err(HandleError::Unsupported("observe"));
        }
        let active = Arc::new(AtomicBool::new(true));
        self.subscriptions.lock().push(Subscription {
            target: target.name().to_string(),
            recursive,
            sink,
            active: active.clone(),
        });
        Ok(Box::new(MemoryRegistration { active }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_get_handle_kinds() {
        let root = MemoryDirectory::new_root("root");
        root.add_file("a.txt", b"a".to_vec());
        root.add_dir("sub");

        assert!(root.get_file_handle("a.txt", false).await.is_ok());
        assert!(matches!(
            root.get_file_handle("sub", false).await,
            Err(HandleError::TypeMismatch { .. })
        ));
        assert!(matches!(
            root.get_directory_handle("missing", false).await,
            Err(HandleError::NotFound { .. })
        ));
        assert!(root.get_directory_handle("new", true).await.is_ok());
        assert_eq!(root.child_names(), vec!["a.txt", "new", "sub"]);
    }

    #[tokio::test]
    async fn test_fallback_lookup_prefers_file() {
        let root = MemoryDirectory::with_options(
            "root",
            MemoryOptions {
                fallback_lookup: true,
                ..MemoryOptions::default()
            },
        );
        root.add_dir("sub");

        let found = root.lookup("sub").await.unwrap().expect("Should exist");
        assert!(found.is_directory());
        // File lookup missed first, then directory lookup hit
        assert_eq!(root.typed_get_count(), 2);

        assert!(root.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_non_empty_requires_recursive() {
        let root = MemoryDirectory::new_root("root");
        root.add_dir("sub").add_file("x", b"x".to_vec());

        assert!(matches!(
            root.remove_entry("sub", false).await,
            Err(HandleError::InvalidModification(_))
        ));
        root.remove_entry("sub", true).await.unwrap();
        assert!(!root.contains("sub"));
    }

    #[tokio::test]
    async fn test_streamed_read_uses_native_chunks() {
        let root = MemoryDirectory::with_options(
            "root",
            MemoryOptions {
                chunk_size: 4,
                ..MemoryOptions::default()
            },
        );
        let file = root.add_file("f", b"0123456789".to_vec());
        let chunks: Vec<Bytes> = file.open_read().await.unwrap().try_collect().await.unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_writes_land_on_close() {
        let file = MemoryFile::new_detached("f", Vec::new());
        let mut writable = file.create_writable().await.unwrap();
        writable.write(Bytes::from_static(b"hello ")).await.unwrap();
        writable.write(Bytes::from_static(b"world")).await.unwrap();
        assert!(file.content().is_empty());

        writable.close().await.unwrap();
        assert_eq!(file.content(), Bytes::from_static(b"hello world"));
        assert_eq!(file.commit_count(), 1);
        assert_eq!(file.write_chunk_sizes(), vec![6, 5]);
    }

    #[tokio::test]
    async fn test_revoked_permission_blocks_operations() {
        let root = MemoryDirectory::new_root("root");
        let file = root.add_file("a", b"a".to_vec());
        root.gate().set_state(PermissionState::Prompt);

        assert_eq!(file.read_all().await.unwrap_err(), HandleError::NotAllowed);
        assert!(root.entries().await.is_err());
    }
}
