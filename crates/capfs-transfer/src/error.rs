//! Errors surfaced by the transfer engine.
//!
//! Per-entry failures never become a [`TransferError`]; they are recorded on
//! the entry and the batch carries on. What is left here aborts a whole
//! transfer call.

use capfs_core::{HandleError, ProviderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The user dismissed the destination prompt, or it failed.
    #[error("Transfer cancelled")]
    Cancelled,

    /// A bridge operation failed outside any single entry.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A destination or source handle failed outside any single entry.
    #[error("Handle operation failed: {0}")]
    Handle(#[from] HandleError),

    /// A collaborator (dialog, saver, copier) reported an error.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// Transfer configuration could not be parsed.
    #[error("Invalid transfer configuration: {0}")]
    Config(String),
}

impl TransferError {
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Provider(e) => e.is_cancelled(),
            Self::Handle(e) => matches!(e, HandleError::Aborted),
            Self::Collaborator { .. } | Self::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
