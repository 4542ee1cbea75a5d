//! External collaborators of the transfer engine.
//!
//! Dialogs, editors and save actions belong to the embedding application.
//! The engine only talks to them through these traits.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use capfs_core::{DirectoryHandle, Identifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Colliding names listed by [`ConfirmRequest::multiple_overwrite`] before
/// the rest are summarized.
pub const MAX_CONFIRM_NAMES: usize = 10;

const IRREVERSIBLE: &str = "This action is irreversible!";

/// A yes/no question for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub message: String,
    pub detail: Option<String>,
    pub primary_button: String,
}

impl ConfirmRequest {
    /// The question asked before an upload replaces an existing entry.
    pub fn file_overwrite(name: &str) -> Self {
        Self {
            message: format!(
                "A file or folder with the name '{name}' already exists in the destination folder. Do you want to replace it?"
            ),
            detail: Some(IRREVERSIBLE.to_string()),
            primary_button: "Replace".to_string(),
        }
    }

    /// One question covering several colliding entries. A single name asks
    /// [`ConfirmRequest::file_overwrite`] instead.
    pub fn multiple_overwrite<S: AsRef<str>>(names: &[S]) -> Self {
        if let [name] = names {
            return Self::file_overwrite(name.as_ref());
        }

        let mut lines: Vec<String> = names
            .iter()
            .take(MAX_CONFIRM_NAMES)
            .map(|n| n.as_ref().to_string())
            .collect();
        match names.len().saturating_sub(MAX_CONFIRM_NAMES) {
            0 => {}
            1 => lines.push("...1 additional file not shown".to_string()),
            hidden => lines.push(format!("...{hidden} additional files not shown")),
        }
        lines.push(String::new());
        lines.push(IRREVERSIBLE.to_string());

        Self {
            message: format!(
                "The following {} files and/or folders already exist in the destination folder. Do you want to replace them?",
                names.len()
            ),
            detail: Some(lines.join("\n")),
            primary_button: "Replace".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmResult {
    pub confirmed: bool,
}

/// Confirmation dialog.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmResult;
}

/// Opens a resource for the user after a single-file upload.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self, resource: &Identifier) -> Result<()>;
}

/// Destination root picker of the handle-based download.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// `Ok(None)` when the user dismisses the picker.
    async fn pick_directory(&self) -> Result<Option<Arc<dyn DirectoryHandle>>>;
}

/// "Save as" action of the whole-blob download fallback.
#[async_trait]
pub trait BlobSaver: Send + Sync {
    /// Offer `content` to the user under `name`.
    async fn save_blob(&self, name: &str, content: Bytes) -> Result<()>;

    /// Hand over a resource that could not be read into memory.
    async fn save_reference(&self, resource: &Identifier) -> Result<()>;
}

/// Destination prompt of the native download.
#[async_trait]
pub trait SaveDialog: Send + Sync {
    /// `Ok(None)` when the user cancels.
    async fn pick_save_path(
        &self,
        default_dir: Option<&Path>,
        suggested_name: &str,
    ) -> Result<Option<PathBuf>>;
}

/// Native bulk copy of the native download.
#[async_trait]
pub trait BulkCopier: Send + Sync {
    async fn copy(&self, source: &Identifier, destination: &Path) -> Result<()>;
}
