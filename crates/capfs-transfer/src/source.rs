//! Upload input: trees of external content.
//!
//! The engine never sees where upload content comes from. A
//! [`TransferSource`] is either a file that can be read whole or as a chunk
//! stream, or a directory whose children are discovered lazily through an
//! [`EntryReader`], one batch at a time, so the size of a tree is unknown
//! until it has been walked.
//!
//! [`TransferSource::from_handle`] adapts capability handles, which is how
//! dropped or picked external folders enter the engine.

use crate::entry::TransferEntry;
use async_trait::async_trait;
use bytes::Bytes;
use capfs_core::{
    ByteStream, DirectoryHandle, EntryStream, FileHandle, Handle, HandleBase, HandleError,
    PermissionMode, PermissionState,
};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;

/// Children returned per [`EntryReader::read_batch`] by the handle adapter.
pub const ENTRY_BATCH_SIZE: usize = 100;

/// A file to upload.
#[async_trait]
pub trait SourceFile: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether the file can be read at all. Checked once per top-level
    /// source before anything is uploaded.
    async fn is_accessible(&self) -> bool {
        true
    }

    async fn size(&self) -> Result<u64, HandleError>;

    /// Whether [`SourceFile::open_stream`] is available. Sources that cannot
    /// stream are always buffered.
    fn supports_streaming(&self) -> bool {
        true
    }

    async fn read_all(&self) -> Result<Bytes, HandleError>;

    async fn open_stream(&self) -> Result<ByteStream, HandleError>;
}

/// A directory to upload.
#[async_trait]
pub trait SourceDirectory: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether the directory can be read at all.
    async fn is_accessible(&self) -> bool {
        true
    }

    async fn open_reader(&self) -> Result<Box<dyn EntryReader>, HandleError>;
}

/// Incremental enumeration of a [`SourceDirectory`].
#[async_trait]
pub trait EntryReader: Send {
    /// Next batch of children. An empty batch ends the enumeration.
    async fn read_batch(&mut self) -> Result<Vec<TransferSource>, HandleError>;
}

/// One node of upload input.
#[derive(Debug, Clone)]
pub enum TransferSource {
    File(Arc<dyn SourceFile>),
    Directory(Arc<dyn SourceDirectory>),
}

impl TransferSource {
    /// Adapt a capability handle.
    pub fn from_handle(handle: Handle) -> Self {
        match handle {
            Handle::File(file) => Self::File(Arc::new(HandleSourceFile { file })),
            Handle::Directory(dir) => Self::Directory(Arc::new(HandleSourceDirectory { dir })),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => file.name(),
            Self::Directory(dir) => dir.name(),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub async fn is_accessible(&self) -> bool {
        match self {
            Self::File(file) => file.is_accessible().await,
            Self::Directory(dir) => dir.is_accessible().await,
        }
    }

    /// Describe the node. File sizes are filled in once they are read.
    pub fn describe(&self) -> TransferEntry {
        TransferEntry::new(self.name(), self.is_directory())
    }
}

impl From<Handle> for TransferSource {
    fn from(handle: Handle) -> Self {
        Self::from_handle(handle)
    }
}

#[derive(Debug)]
struct HandleSourceFile {
    file: Arc<dyn FileHandle>,
}

#[async_trait]
impl SourceFile for HandleSourceFile {
    fn name(&self) -> &str {
        self.file.name()
    }

    async fn is_accessible(&self) -> bool {
        readable(self.file.as_ref()).await
    }

    async fn size(&self) -> Result<u64, HandleError> {
        Ok(self.file.snapshot().await?.size)
    }

    async fn read_all(&self) -> Result<Bytes, HandleError> {
        self.file.read_all().await
    }

    async fn open_stream(&self) -> Result<ByteStream, HandleError> {
        self.file.open_read().await
    }
}

#[derive(Debug)]
struct HandleSourceDirectory {
    dir: Arc<dyn DirectoryHandle>,
}

#[async_trait]
impl SourceDirectory for HandleSourceDirectory {
    fn name(&self) -> &str {
        self.dir.name()
    }

    async fn is_accessible(&self) -> bool {
        readable(self.dir.as_ref()).await
    }

    async fn open_reader(&self) -> Result<Box<dyn EntryReader>, HandleError> {
        Ok(Box::new(HandleEntryReader {
            entries: self.dir.entries().await?,
        }))
    }
}

async fn readable<H: HandleBase + ?Sized>(handle: &H) -> bool {
    matches!(
        handle.query_permission(PermissionMode::Read).await,
        Ok(PermissionState::Granted)
    )
}

struct HandleEntryReader {
    entries: EntryStream,
}

#[async_trait]
impl EntryReader for HandleEntryReader {
    async fn read_batch(&mut self) -> Result<Vec<TransferSource>, HandleError> {
        let mut batch = Vec::new();
        while batch.len() < ENTRY_BATCH_SIZE {
            match self.entries.next().await {
                Some(entry) => batch.push(TransferSource::from_handle(entry?)),
                None => break,
            }
        }
        Ok(batch)
    }
}
