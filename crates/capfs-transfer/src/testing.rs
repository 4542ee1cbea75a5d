//! Recording collaborators for transfer tests.
//!
//! Every collaborator records what it was asked so tests can assert on the
//! conversation between the engine and the embedding application.

use crate::collaborators::{
    BlobSaver, BulkCopier, Confirm, ConfirmRequest, ConfirmResult, DirectoryPicker, Opener,
    SaveDialog,
};
use crate::error::{Result, TransferError};
use crate::progress::{ProgressReporter, ProgressStep};
use async_trait::async_trait;
use bytes::Bytes;
use capfs_core::{DirectoryHandle, Identifier};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reporter that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.messages.lock().last().cloned()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, step: ProgressStep) {
        self.messages.lock().push(step.message);
    }
}

/// Confirm dialog answering from a script, then with a default.
#[derive(Debug)]
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    default: bool,
    requests: Mutex<Vec<ConfirmRequest>>,
}

impl ScriptedConfirm {
    /// Always answer `answer`.
    pub fn always(answer: bool) -> Arc<Self> {
        Self::script(Vec::new(), answer)
    }

    /// Answer `answers` in order, then `default`.
    pub fn script(answers: Vec<bool>, default: bool) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            default,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ConfirmRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmResult {
        self.requests.lock().push(request);
        let confirmed = self.answers.lock().pop_front().unwrap_or(self.default);
        ConfirmResult { confirmed }
    }
}

/// Opener that records what it opened.
#[derive(Debug, Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<Identifier>>,
}

impl RecordingOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> Vec<Identifier> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Opener for RecordingOpener {
    async fn open(&self, resource: &Identifier) -> Result<()> {
        self.opened.lock().push(resource.clone());
        Ok(())
    }
}

/// Destination picker returning a fixed folder, nothing, or an error.
#[derive(Debug)]
pub struct FixedPicker {
    folder: Option<Arc<dyn DirectoryHandle>>,
    fail: bool,
    calls: Mutex<usize>,
}

impl FixedPicker {
    pub fn new(folder: Arc<dyn DirectoryHandle>) -> Arc<Self> {
        Arc::new(Self {
            folder: Some(folder),
            fail: false,
            calls: Mutex::new(0),
        })
    }

    /// A picker the user dismisses.
    pub fn dismissed() -> Arc<Self> {
        Arc::new(Self {
            folder: None,
            fail: false,
            calls: Mutex::new(0),
        })
    }

    /// A picker that fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            folder: None,
            fail: true,
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl DirectoryPicker for FixedPicker {
    async fn pick_directory(&self) -> Result<Option<Arc<dyn DirectoryHandle>>> {
        *self.calls.lock() += 1;
        if self.fail {
            return Err(TransferError::collaborator("destination picker", "picker crashed"));
        }
        Ok(self.folder.clone())
    }
}

/// Blob saver recording what it was handed.
#[derive(Debug, Default)]
pub struct RecordingBlobSaver {
    blobs: Mutex<Vec<(String, Bytes)>>,
    references: Mutex<Vec<Identifier>>,
}

impl RecordingBlobSaver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blobs(&self) -> Vec<(String, Bytes)> {
        self.blobs.lock().clone()
    }

    pub fn references(&self) -> Vec<Identifier> {
        self.references.lock().clone()
    }
}

#[async_trait]
impl BlobSaver for RecordingBlobSaver {
    async fn save_blob(&self, name: &str, content: Bytes) -> Result<()> {
        self.blobs.lock().push((name.to_string(), content));
        Ok(())
    }

    async fn save_reference(&self, resource: &Identifier) -> Result<()> {
        self.references.lock().push(resource.clone());
        Ok(())
    }
}

/// Save dialog answering from a script; `None` answers dismiss it.
#[derive(Debug)]
pub struct ScriptedSaveDialog {
    answers: Mutex<VecDeque<Option<PathBuf>>>,
    prompts: Mutex<Vec<(Option<PathBuf>, String)>>,
}

impl ScriptedSaveDialog {
    pub fn new(answers: Vec<Option<PathBuf>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// `(default folder, suggested name)` of every prompt.
    pub fn prompts(&self) -> Vec<(Option<PathBuf>, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl SaveDialog for ScriptedSaveDialog {
    async fn pick_save_path(
        &self,
        default_dir: Option<&Path>,
        suggested_name: &str,
    ) -> Result<Option<PathBuf>> {
        self.prompts
            .lock()
            .push((default_dir.map(Path::to_path_buf), suggested_name.to_string()));
        Ok(self.answers.lock().pop_front().flatten())
    }
}

/// Copier recording requested copies.
#[derive(Debug, Default)]
pub struct RecordingCopier {
    copies: Mutex<Vec<(Identifier, PathBuf)>>,
}

impl RecordingCopier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn copies(&self) -> Vec<(Identifier, PathBuf)> {
        self.copies.lock().clone()
    }
}

#[async_trait]
impl BulkCopier for RecordingCopier {
    async fn copy(&self, source: &Identifier, destination: &Path) -> Result<()> {
        self.copies
            .lock()
            .push((source.clone(), destination.to_path_buf()));
        Ok(())
    }
}
