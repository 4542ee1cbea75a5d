//! Identifier → handle resolution.
//!
//! There is no "open by path" primitive. An identifier is resolved by asking
//! the capability store first; failing that, by resolving the parent and
//! looking the last component up inside it. The walk ends at the root (its
//! own parent), so recursion depth is bounded by the identifier's depth.

use crate::capability::CapabilityStore;
use crate::error::ProviderResult;
use crate::handle::{DirectoryHandle, FileHandle, Handle};
use crate::identifier::Identifier;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::trace;

/// Resolves identifiers against registered handles.
#[derive(Debug, Clone)]
pub struct HandleResolver {
    store: Arc<CapabilityStore>,
}

impl HandleResolver {
    pub fn new(store: Arc<CapabilityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    /// Resolve an identifier to a handle.
    ///
    /// `Ok(None)` means no handle is reachable: the chain never meets a
    /// registered root, an intermediate node is a file, or a lookup failed.
    /// The only error is `Unavailable`, when a registered root exists but
    /// permission could not be obtained.
    pub fn resolve<'a>(&'a self, id: &'a Identifier) -> BoxFuture<'a, ProviderResult<Option<Handle>>> {
        async move {
            if let Some(handle) = self.store.get(id).await? {
                return Ok(Some(handle));
            }

            let parent = id.parent();
            if parent == *id {
                return Ok(None);
            }
            let Some(name) = id.name() else {
                return Ok(None);
            };

            let Some(Handle::Directory(dir)) = self.resolve(&parent).await? else {
                trace!(id = %id, "Parent is not a reachable directory");
                return Ok(None);
            };

            match dir.lookup(name).await {
                Ok(found) => Ok(found),
                Err(e) => {
                    trace!(id = %id, error = %e, "Lookup failed");
                    Ok(None)
                }
            }
        }
        .boxed()
    }

    /// Resolve to a file handle; directories resolve to `None`.
    pub async fn resolve_file(&self, id: &Identifier) -> ProviderResult<Option<Arc<dyn FileHandle>>> {
        Ok(self.resolve(id).await?.and_then(Handle::into_file))
    }

    /// Resolve to a directory handle; files resolve to `None`.
    pub async fn resolve_directory(
        &self,
        id: &Identifier,
    ) -> ProviderResult<Option<Arc<dyn DirectoryHandle>>> {
        Ok(self.resolve(id).await?.and_then(Handle::into_directory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleKind;
    use crate::store::MemoryKeyValueStore;
    use crate::testing::MemoryDirectory;

    async fn setup() -> (Arc<MemoryDirectory>, HandleResolver) {
        let store = Arc::new(CapabilityStore::new(Arc::new(MemoryKeyValueStore::new())));
        let root = MemoryDirectory::new_root("project");
        let src = root.add_dir("src");
        src.add_file("main.rs", b"fn main() {}".to_vec());
        root.add_file("README.md", b"# project".to_vec());
        store.register(Handle::Directory(root.clone())).await;
        (root, HandleResolver::new(store))
    }

    #[tokio::test]
    async fn test_resolves_nested_file() {
        let (_, resolver) = setup().await;
        let handle = resolver
            .resolve(&Identifier::new("/project/src/main.rs"))
            .await
            .unwrap()
            .expect("Should resolve");
        assert_eq!(handle.kind(), HandleKind::File);
        assert_eq!(handle.name(), "main.rs");
    }

    #[tokio::test]
    async fn test_resolves_directory() {
        let (_, resolver) = setup().await;
        let dir = resolver
            .resolve_directory(&Identifier::new("/project/src"))
            .await
            .unwrap();
        assert!(dir.is_some());
        let not_file = resolver.resolve_file(&Identifier::new("/project/src")).await.unwrap();
        assert!(not_file.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_chain_is_none() {
        let (_, resolver) = setup().await;
        for path in ["/", "/unknown", "/unknown/a/b/c", "/project/missing", "/project/README.md/x"] {
            let resolved = resolver.resolve(&Identifier::new(path)).await.unwrap();
            assert!(resolved.is_none(), "{path} should not resolve");
        }
    }

    #[tokio::test]
    async fn test_lookup_failures_are_absorbed() {
        let (root, resolver) = setup().await;
        root.set_fail_lookups(true);
        let resolved = resolver
            .resolve(&Identifier::new("/project/src/main.rs"))
            .await
            .unwrap();
        assert!(resolved.is_none());
    }
}
