//! Document types

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum document ID length in bytes
pub const MAX_ID_LEN: usize = 512;

/// Length of generated document IDs
pub const RANDOM_ID_LEN: usize = 12;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Document identifier - UTF-8 string, max 512 bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new document ID, validating the format
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidDocumentId("Document ID cannot be empty".into()));
        }

        if id.len() > MAX_ID_LEN {
            return Err(Error::InvalidDocumentId(format!(
                "Document ID exceeds {} bytes",
                MAX_ID_LEN
            )));
        }

        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-') {
            return Err(Error::InvalidDocumentId(
                "Document ID must match pattern [a-zA-Z0-9:_-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    /// Generate a fresh 12-letter identifier for a new notepad
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..RANDOM_ID_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// A stored notepad row.
///
/// There is no version counter: the store keeps only the latest content, and
/// the order of writes decides what everyone ends up seeing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub content: String,
    /// Unix milliseconds
    pub created_at: u64,
    /// Unix milliseconds
    pub updated_at: u64,
}

impl Document {
    pub fn new(id: DocumentId, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the content and bump `updated_at`
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.updated_at = now_millis().max(self.updated_at);
    }

    /// Size of the row payload in bytes
    pub fn size(&self) -> usize {
        self.id.as_str().len() + self.content.len()
    }
}

/// Current wall-clock time in unix milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
