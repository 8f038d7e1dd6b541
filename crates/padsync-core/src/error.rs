//! Error types for padsync core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid document ID: {0}")]
    InvalidDocumentId(String),

    #[error("Invalid participant ID: {0}")]
    InvalidParticipantId(String),

    #[error("Document already exists: {0}")]
    DocumentExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel error: {0}")]
    Channel(#[from] crate::channel::ChannelError),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for padsync core operations
pub type Result<T> = std::result::Result<T, Error>;
