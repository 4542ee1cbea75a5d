//! Bridge session over the configured local roots.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use capfs_core::{Handle, HandleFileSystem, Identifier, MemoryKeyValueStore};
use tracing::{debug, instrument};

use crate::local::LocalDirectory;

/// A local directory registered as a top-level root.
#[derive(Debug, Clone)]
pub struct MountedRoot {
    pub alias: String,
    pub id: Identifier,
    pub path: PathBuf,
}

/// Handle file system with every configured root registered.
#[derive(Debug)]
pub struct Session {
    fs: Arc<HandleFileSystem>,
    roots: Vec<MountedRoot>,
}

impl Session {
    /// Register each root directory under its alias.
    #[instrument(level = "debug", skip_all, fields(roots = roots.len()))]
    pub async fn open(roots: &BTreeMap<String, PathBuf>) -> Result<Self> {
        let fs = Arc::new(HandleFileSystem::new(Arc::new(MemoryKeyValueStore::new())));
        let mut mounted = Vec::with_capacity(roots.len());

        for (alias, path) in roots {
            let path = tokio::fs::canonicalize(path)
                .await
                .with_context(|| format!("Root '{alias}' is not accessible: {}", path.display()))?;
            if !tokio::fs::metadata(&path).await?.is_dir() {
                bail!("Root '{alias}' is not a directory: {}", path.display());
            }

            let id = fs
                .register(Handle::Directory(LocalDirectory::new(alias.clone(), path.clone())))
                .await;
            debug!(alias, id = %id, path = %path.display(), "Registered root");
            mounted.push(MountedRoot {
                alias: alias.clone(),
                id,
                path,
            });
        }

        Ok(Self { fs, roots: mounted })
    }

    pub fn fs(&self) -> &Arc<HandleFileSystem> {
        &self.fs
    }

    pub fn roots(&self) -> &[MountedRoot] {
        &self.roots
    }
}
