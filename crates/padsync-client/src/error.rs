//! Client error types

use padsync_core::ChannelError;
use padsync_storage::StorageError;

/// Errors raised by the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to load document: {0}")]
    Initialization(#[source] StorageError),

    #[error("Failed to save document: {0}")]
    Persistence(#[source] StorageError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// A user-visible, non-blocking problem with the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The initial load (or lazy creation) failed
    LoadFailed(String),
    /// The last debounced write failed; the buffer still holds the edit
    SaveFailed(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::LoadFailed(msg) => write!(f, "Could not load notepad: {}", msg),
            Notice::SaveFailed(msg) => write!(f, "Could not save changes: {}", msg),
        }
    }
}
