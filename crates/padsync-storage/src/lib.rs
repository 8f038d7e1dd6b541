//! padsync Storage Backends
//!
//! Provides pluggable document stores:
//! - Memory (default): Fast, volatile storage
//! - SQLite: Embedded persistence
//! - PostgreSQL: Scalable persistence
//!
//! Every backend implements insert-if-absent atomically, so two clients that
//! open the same unknown document at once end up with exactly one row.

pub mod memory;
pub mod notify;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use padsync_core::{Document, DocumentId};

/// Document store trait
#[async_trait]
pub trait Storage: Send + Sync {
    /// Point read; `None` when no row exists
    async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError>;

    /// Create a row unless one already exists. Never overwrites.
    async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError>;

    /// Replace the content of an existing row
    async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError>;

    /// Delete a row, returning whether it existed
    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError>;

    /// List documents whose id matches a pattern, most recently updated first
    async fn list(&self, pattern: Option<&str>) -> Result<Vec<Document>, StorageError>;

    /// Check if a document exists
    async fn exists(&self, id: &DocumentId) -> Result<bool, StorageError>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats, StorageError>;
}

/// Result of [`Storage::insert_if_absent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This call created the row
    Inserted(Document),
    /// Someone else created it first; the existing row was left untouched
    AlreadyExists,
}

impl InsertOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rejected: {code} {message}")]
    Rejected { code: String, message: String },
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub document_count: usize,
    pub total_size_bytes: usize,
}

/// Simple glob pattern matching: `*`, `prefix*`, `*suffix` or an exact id
pub fn matches_pattern(key: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        return key.ends_with(suffix);
    }

    key == pattern
}

/// Translate a glob pattern into a SQL LIKE pattern, backslash-escaping literal wildcards
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn like_pattern(pattern: &str) -> String {
    let escape = |s: &str| s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");

    if pattern == "*" {
        "%".to_string()
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        format!("{}%", escape(prefix))
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        format!("%{}", escape(suffix))
    } else {
        escape(pattern)
    }
}

pub use memory::MemoryStorage;
pub use notify::NotifyingStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("team:123", "team:*"));
        assert!(matches_pattern("team:123", "*:123"));
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("abc123", "abc123"));
        assert!(!matches_pattern("cart:456", "team:*"));
    }

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[test]
    fn test_like_pattern_escaping() {
        assert_eq!(like_pattern("*"), "%");
        assert_eq!(like_pattern("team:*"), "team:%");
        assert_eq!(like_pattern("*_x"), "%\\_x");
        assert_eq!(like_pattern("a%b"), "a\\%b");
    }
}
