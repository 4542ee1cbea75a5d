//! Capability handle model.
//!
//! A handle is an opaque capability for one file or directory node, granted
//! by the environment through explicit user consent. The environment offers
//! only per-node primitives: open a child by name (optionally creating it),
//! remove a child, enumerate children, and query or request permission.
//!
//! [`Handle`] is a sum type over the two node kinds so callers dispatch on
//! the variant instead of probing a handle's type at runtime.

use crate::error::HandleError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::trace;

/// Stream of content chunks, in the source's native chunk size.
pub type ByteStream = BoxStream<'static, Result<Bytes, HandleError>>;

/// Stream of child handles produced by directory enumeration.
pub type EntryStream = BoxStream<'static, Result<Handle, HandleError>>;

/// Kind of node a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    File,
    Directory,
}

/// Access level requested from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionMode {
    Read,
    ReadWrite,
}

/// Live permission state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionState {
    /// Access is granted for this session.
    Granted,
    /// The user refused access.
    Denied,
    /// Access has to be requested (and the user asked) before use.
    Prompt,
}

/// Point-in-time metadata of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: SystemTime,
}

/// Operations shared by file and directory handles.
#[async_trait]
pub trait HandleBase: Send + Sync + fmt::Debug {
    /// Name of the node (never contains `/`).
    fn name(&self) -> &str;

    /// Query the current permission state without prompting.
    async fn query_permission(&self, mode: PermissionMode) -> Result<PermissionState, HandleError>;

    /// Ask the environment (and the user) for permission.
    async fn request_permission(&self, mode: PermissionMode)
    -> Result<PermissionState, HandleError>;

    /// Whether `other` refers to the same underlying node.
    async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError>;

    /// Backend access for `is_same_entry` implementations.
    fn as_any(&self) -> &dyn Any;
}

/// Handle to a file node.
#[async_trait]
pub trait FileHandle: HandleBase {
    /// Size and modification time of the current content.
    async fn snapshot(&self) -> Result<FileSnapshot, HandleError>;

    /// Read the entire content.
    async fn read_all(&self) -> Result<Bytes, HandleError>;

    /// Read the content as a stream of chunks.
    async fn open_read(&self) -> Result<ByteStream, HandleError>;

    /// Open a writable stream that replaces the content when closed.
    async fn create_writable(&self) -> Result<Box<dyn WritableFileStream>, HandleError>;
}

/// Writable stream obtained from [`FileHandle::create_writable`].
#[async_trait]
pub trait WritableFileStream: Send {
    /// Append a chunk.
    async fn write(&mut self, data: Bytes) -> Result<(), HandleError>;

    /// Commit everything written so far.
    async fn close(self: Box<Self>) -> Result<(), HandleError>;

    /// Discard the stream. Whatever the backend already persisted stays.
    async fn abort(self: Box<Self>) -> Result<(), HandleError>;
}

/// Handle to a directory node.
#[async_trait]
pub trait DirectoryHandle: HandleBase {
    /// Open (or create) a child file.
    async fn get_file_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn FileHandle>, HandleError>;

    /// Open (or create) a child directory.
    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn DirectoryHandle>, HandleError>;

    /// Remove a child. Non-empty directories require `recursive`.
    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), HandleError>;

    /// Enumerate children.
    async fn entries(&self) -> Result<EntryStream, HandleError>;

    /// Look up a child of either kind.
    ///
    /// Backends that can check existence directly should override this. The
    /// default is [`probe_child`].
    async fn lookup(&self, name: &str) -> Result<Option<Handle>, HandleError> {
        probe_child(self, name).await
    }
}

/// Find a child by probing for a file first and a directory second.
///
/// Any probe failure counts as "no such child".
pub async fn probe_child<D>(dir: &D, name: &str) -> Result<Option<Handle>, HandleError>
where
    D: DirectoryHandle + ?Sized,
{
    match dir.get_file_handle(name, false).await {
        Ok(file) => return Ok(Some(Handle::File(file))),
        Err(e) => trace!(name, error = %e, "file probe missed"),
    }
    match dir.get_directory_handle(name, false).await {
        Ok(dir) => Ok(Some(Handle::Directory(dir))),
        Err(e) => {
            trace!(name, error = %e, "directory probe missed");
            Ok(None)
        }
    }
}

/// A file or directory capability.
#[derive(Debug, Clone)]
pub enum Handle {
    File(Arc<dyn FileHandle>),
    Directory(Arc<dyn DirectoryHandle>),
}

impl Handle {
    fn base(&self) -> &dyn HandleBase {
        match self {
            Handle::File(f) => f.as_ref(),
            Handle::Directory(d) => d.as_ref(),
        }
    }

    pub fn kind(&self) -> HandleKind {
        match self {
            Handle::File(_) => HandleKind::File,
            Handle::Directory(_) => HandleKind::Directory,
        }
    }

    pub fn name(&self) -> &str {
        self.base().name()
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Handle::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Handle::Directory(_))
    }

    pub fn as_file(&self) -> Option<&Arc<dyn FileHandle>> {
        match self {
            Handle::File(f) => Some(f),
            Handle::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Arc<dyn DirectoryHandle>> {
        match self {
            Handle::Directory(d) => Some(d),
            Handle::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<Arc<dyn FileHandle>> {
        match self {
            Handle::File(f) => Some(f),
            Handle::Directory(_) => None,
        }
    }

    pub fn into_directory(self) -> Option<Arc<dyn DirectoryHandle>> {
        match self {
            Handle::Directory(d) => Some(d),
            Handle::File(_) => None,
        }
    }

    pub async fn query_permission(
        &self,
        mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        self.base().query_permission(mode).await
    }

    pub async fn request_permission(
        &self,
        mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        self.base().request_permission(mode).await
    }

    /// Whether both handles refer to the same node. Handles of different
    /// kinds never do.
    pub async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError> {
        if self.kind() != other.kind() {
            return Ok(false);
        }
        self.base().is_same_entry(other).await
    }

    /// Backend access to the concrete handle type.
    pub fn as_any(&self) -> &dyn Any {
        self.base().as_any()
    }
}

impl From<Arc<dyn FileHandle>> for Handle {
    fn from(f: Arc<dyn FileHandle>) -> Self {
        Handle::File(f)
    }
}

impl From<Arc<dyn DirectoryHandle>> for Handle {
    fn from(d: Arc<dyn DirectoryHandle>) -> Self {
        Handle::Directory(d)
    }
}
