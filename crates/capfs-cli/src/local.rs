//! Local-directory handle backend.
//!
//! Exposes host directories through the capability handle traits so the
//! bridge runs outside a sandbox. Access is granted for as long as the node
//! exists and the process may read it. Writes land in a hidden sibling file
//! and are renamed into place when the writable closes, so readers never see
//! half-written content.

use async_trait::async_trait;
use bytes::Bytes;
use capfs_core::{
    ByteStream, DirectoryHandle, EntryStream, FileHandle, FileSnapshot, Handle, HandleBase,
    HandleError, PermissionMode, PermissionState, WritableFileStream,
};
use futures::{StreamExt, stream};
use std::any::Any;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace, warn};

/// Chunk size of streamed reads.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix of in-progress writes. Such files are hidden from enumeration.
const PARTIAL_SUFFIX: &str = ".capfs-part";

fn name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

/// Map an I/O error on the node called `name`.
fn io_error(e: io::Error, name: &str) -> HandleError {
    match e.kind() {
        io::ErrorKind::NotFound => HandleError::NotFound {
            name: name.to_string(),
        },
        io::ErrorKind::DirectoryNotEmpty => {
            HandleError::InvalidModification(format!("'{name}' is not empty"))
        }
        _ => HandleError::from(e),
    }
}

async fn permission_of(path: &Path, name: &str) -> Result<PermissionState, HandleError> {
    match fs::metadata(path).await {
        Ok(_) => Ok(PermissionState::Granted),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Ok(PermissionState::Denied),
        Err(e) => Err(io_error(e, name)),
    }
}

/// A directory on the host file system.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    name: String,
    path: PathBuf,
}

impl LocalDirectory {
    /// Directory at `path`, exposed under `name`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            path: path.into(),
        })
    }

    /// Directory at `path`, named after its last component.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        Self::new(name_of(&path), path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn child_path(&self, name: &str) -> Result<PathBuf, HandleError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(HandleError::InvalidModification(format!(
                "'{name}' is not a valid entry name"
            )));
        }
        Ok(self.path.join(name))
    }
}

#[async_trait]
impl HandleBase for LocalDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_permission(&self, _mode: PermissionMode) -> Result<PermissionState, HandleError> {
        permission_of(&self.path, &self.name).await
    }

    async fn request_permission(
        &self,
        _mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        permission_of(&self.path, &self.name).await
    }

    async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError> {
        Ok(other
            .as_any()
            .downcast_ref::<LocalDirectory>()
            .is_some_and(|o| o.path == self.path))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirectory {
    async fn get_file_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn FileHandle>, HandleError> {
        let path = self.child_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(LocalFile::open(path)),
            Ok(_) => Err(HandleError::TypeMismatch {
                name: name.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .await
                    .map_err(|e| io_error(e, name))?;
                trace!(path = %path.display(), "Created file");
                Ok(LocalFile::open(path))
            }
            Err(e) => Err(io_error(e, name)),
        }
    }

    async fn get_directory_handle(
        &self,
        name: &str,
        create: bool,
    ) -> Result<Arc<dyn DirectoryHandle>, HandleError> {
        let path = self.child_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(LocalDirectory::new(name, path)),
            Ok(_) => Err(HandleError::TypeMismatch {
                name: name.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound && create => {
                fs::create_dir(&path).await.map_err(|e| io_error(e, name))?;
                trace!(path = %path.display(), "Created directory");
                Ok(LocalDirectory::new(name, path))
            }
            Err(e) => Err(io_error(e, name)),
        }
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), HandleError> {
        let path = self.child_path(name)?;
        let meta = fs::metadata(&path).await.map_err(|e| io_error(e, name))?;
        let result = if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_dir(&path).await
            }
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| io_error(e, name))?;
        debug!(path = %path.display(), recursive, "Removed entry");
        Ok(())
    }

    async fn entries(&self) -> Result<EntryStream, HandleError> {
        let mut reader = fs::read_dir(&self.path)
            .await
            .map_err(|e| io_error(e, &self.name))?;
        let mut children = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(e, &self.name))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(path = %entry.path().display(), "Skipping entry with a non UTF-8 name");
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            // Follows symlinks; dangling links are left out.
            match fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_dir() => {
                    children.push((name.clone(), Handle::Directory(LocalDirectory::new(name, entry.path()))));
                }
                Ok(_) => children.push((name, Handle::File(LocalFile::open(entry.path())))),
                Err(e) => debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry"),
            }
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(stream::iter(children.into_iter().map(|(_, handle)| Ok(handle))).boxed())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Handle>, HandleError> {
        let path = self.child_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(Handle::Directory(LocalDirectory::new(name, path)))),
            Ok(_) => Ok(Some(Handle::File(LocalFile::open(path)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e, name)),
        }
    }
}

/// A file on the host file system.
#[derive(Debug, Clone)]
pub struct LocalFile {
    name: String,
    path: PathBuf,
}

impl LocalFile {
    /// File at `path`, named after its last component.
    pub fn open(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        Arc::new(Self {
            name: name_of(&path),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn partial_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!(".{}{PARTIAL_SUFFIX}", self.name))
    }
}

#[async_trait]
impl HandleBase for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_permission(&self, _mode: PermissionMode) -> Result<PermissionState, HandleError> {
        permission_of(&self.path, &self.name).await
    }

    async fn request_permission(
        &self,
        _mode: PermissionMode,
    ) -> Result<PermissionState, HandleError> {
        permission_of(&self.path, &self.name).await
    }

    async fn is_same_entry(&self, other: &Handle) -> Result<bool, HandleError> {
        Ok(other
            .as_any()
            .downcast_ref::<LocalFile>()
            .is_some_and(|o| o.path == self.path))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl FileHandle for LocalFile {
    async fn snapshot(&self) -> Result<FileSnapshot, HandleError> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|e| io_error(e, &self.name))?;
        if meta.is_dir() {
            return Err(HandleError::TypeMismatch {
                name: self.name.clone(),
            });
        }
        Ok(FileSnapshot {
            size: meta.len(),
            last_modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    async fn read_all(&self) -> Result<Bytes, HandleError> {
        let content = fs::read(&self.path)
            .await
            .map_err(|e| io_error(e, &self.name))?;
        Ok(Bytes::from(content))
    }

    async fn open_read(&self) -> Result<ByteStream, HandleError> {
        let file = fs::File::open(&self.path)
            .await
            .map_err(|e| io_error(e, &self.name))?;
        Ok(ReaderStream::with_capacity(file, READ_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(HandleError::from))
            .boxed())
    }

    async fn create_writable(&self) -> Result<Box<dyn WritableFileStream>, HandleError> {
        let partial = self.partial_path();
        let file = fs::File::create(&partial)
            .await
            .map_err(|e| io_error(e, &self.name))?;
        Ok(Box::new(LocalWritable {
            file,
            partial,
            target: self.path.clone(),
        }))
    }
}

/// Writable backed by a hidden sibling file.
struct LocalWritable {
    file: fs::File,
    partial: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl WritableFileStream for LocalWritable {
    async fn write(&mut self, data: Bytes) -> Result<(), HandleError> {
        self.file.write_all(&data).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), HandleError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        let Self {
            file,
            partial,
            target,
        } = *self;
        drop(file);
        fs::rename(&partial, &target).await?;
        trace!(path = %target.display(), "Committed write");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), HandleError> {
        let Self { file, partial, .. } = *self;
        drop(file);
        match fs::remove_file(&partial).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial write");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capfs_core::probe_child;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn root(temp: &TempDir) -> Arc<LocalDirectory> {
        LocalDirectory::new("root", temp.path())
    }

    async fn child_names(dir: &LocalDirectory) -> Vec<String> {
        dir.entries()
            .await
            .unwrap()
            .map_ok(|h| h.name().to_string())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_file() {
        let temp = TempDir::new().unwrap();
        let dir = root(&temp);

        let file = dir.get_file_handle("a.txt", true).await.unwrap();
        let mut writable = file.create_writable().await.unwrap();
        writable.write(Bytes::from("hello ")).await.unwrap();
        writable.write(Bytes::from("world")).await.unwrap();
        writable.close().await.unwrap();

        assert_eq!(file.read_all().await.unwrap(), Bytes::from("hello world"));
        assert_eq!(file.snapshot().await.unwrap().size, 11);
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_write_is_invisible_until_close() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "old").unwrap();
        let dir = root(&temp);

        let file = dir.get_file_handle("a.txt", false).await.unwrap();
        let mut writable = file.create_writable().await.unwrap();
        writable.write(Bytes::from("new")).await.unwrap();

        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "old");
        assert_eq!(child_names(&dir).await, vec!["a.txt".to_string()]);

        writable.abort().await.unwrap();
        assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "old");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_stream_chunks() {
        let temp = TempDir::new().unwrap();
        let content = vec![7u8; READ_CHUNK_SIZE * 2 + 10];
        std::fs::write(temp.path().join("big.bin"), &content).unwrap();
        let file = LocalFile::open(temp.path().join("big.bin"));

        let chunks: Vec<Bytes> = file.open_read().await.unwrap().try_collect().await.unwrap();

        assert!(chunks.iter().all(|c| c.len() <= READ_CHUNK_SIZE));
        assert_eq!(chunks.concat(), content);
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("docs")).unwrap();
        let dir = root(&temp);

        let err = dir.get_file_handle("docs", true).await.unwrap_err();
        assert_eq!(err, HandleError::TypeMismatch { name: "docs".into() });

        let err = dir.get_directory_handle("missing", false).await.unwrap_err();
        assert_eq!(err, HandleError::NotFound { name: "missing".into() });
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("docs/nested")).unwrap();
        std::fs::write(temp.path().join("docs/nested/a.txt"), "a").unwrap();
        let dir = root(&temp);

        let err = dir.remove_entry("docs", false).await.unwrap_err();
        assert!(matches!(err, HandleError::InvalidModification(_) | HandleError::Io(_)));
        assert!(temp.path().join("docs").exists());

        dir.remove_entry("docs", true).await.unwrap();
        assert!(!temp.path().join("docs").exists());
    }

    #[tokio::test]
    async fn test_entries_sorted() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("c")).unwrap();
        let dir = root(&temp);

        assert_eq!(child_names(&dir).await, vec!["a.txt", "b.txt", "c"]);
    }

    #[tokio::test]
    async fn test_lookup_matches_probe() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("docs")).unwrap();
        let dir = root(&temp);

        for name in ["a.txt", "docs", "missing"] {
            let direct = dir.lookup(name).await.unwrap().map(|h| h.kind());
            let probed = probe_child(dir.as_ref(), name).await.unwrap().map(|h| h.kind());
            assert_eq!(direct, probed, "{name}");
        }
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = root(&temp);

        for name in ["", "..", "a/b"] {
            let err = dir.get_file_handle(name, true).await.unwrap_err();
            assert!(matches!(err, HandleError::InvalidModification(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_same_entry_compares_paths() {
        let temp = TempDir::new().unwrap();
        let a = Handle::Directory(LocalDirectory::new("one", temp.path()));
        let b = Handle::Directory(LocalDirectory::new("two", temp.path()));
        let c = Handle::Directory(LocalDirectory::new("one", temp.path().join("other")));

        assert!(a.is_same_entry(&b).await.unwrap());
        assert!(!a.is_same_entry(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_permission_follows_existence() {
        let temp = TempDir::new().unwrap();
        let dir = root(&temp);
        assert_eq!(
            dir.query_permission(PermissionMode::ReadWrite).await.unwrap(),
            PermissionState::Granted
        );

        let gone = LocalDirectory::new("gone", temp.path().join("gone"));
        assert!(gone.query_permission(PermissionMode::Read).await.is_err());
    }
}
