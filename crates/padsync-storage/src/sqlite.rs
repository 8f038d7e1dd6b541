//! SQLite storage backend

use crate::{like_pattern, InsertOutcome, Storage, StorageError, StorageStats};
use async_trait::async_trait;
use padsync_core::{now_millis, Document, DocumentId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
///
/// Embedded persistence for single-node deployments. Every statement runs
/// under one connection lock, so insert-if-absent and update are atomic with
/// respect to each other.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<(String, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_document(raw: (String, String, i64, i64)) -> Result<Document, StorageError> {
    let (id, content, created_at, updated_at) = raw;
    let id = DocumentId::new(id).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(Document {
        id,
        content,
        created_at: created_at.max(0) as u64,
        updated_at: updated_at.max(0) as u64,
    })
}

impl SqliteStorage {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notepads (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notepads_updated_at ON notepads(updated_at);
            "#,
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn fetch(conn: &Connection, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        conn.query_row(
            "SELECT id, content, created_at, updated_at FROM notepads WHERE id = ?1",
            params![id.as_str()],
            row_to_document,
        )
        .optional()
        .map_err(db_err)?
        .map(into_document)
        .transpose()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        let conn = self.conn.lock();
        Self::fetch(&conn, id)
    }

    async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
        let conn = self.conn.lock();
        let now = now_millis() as i64;

        let inserted = conn
            .execute(
                r#"
                INSERT INTO notepads (id, content, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?3)
                ON CONFLICT(id) DO NOTHING
                "#,
                params![id.as_str(), content, now],
            )
            .map_err(db_err)?;

        if inserted == 0 {
            return Ok(InsertOutcome::AlreadyExists);
        }

        Ok(InsertOutcome::Inserted(Document {
            id: id.clone(),
            content: content.to_string(),
            created_at: now as u64,
            updated_at: now as u64,
        }))
    }

    async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
        let conn = self.conn.lock();

        let affected = conn
            .execute(
                "UPDATE notepads SET content = ?2, updated_at = MAX(updated_at, ?3) WHERE id = ?1",
                params![id.as_str(), content, now_millis() as i64],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }

        Self::fetch(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();

        let affected = conn
            .execute("DELETE FROM notepads WHERE id = ?1", params![id.as_str()])
            .map_err(db_err)?;

        Ok(affected > 0)
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<Document>, StorageError> {
        let conn = self.conn.lock();
        let like = like_pattern(pattern.unwrap_or("*"));

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, content, created_at, updated_at FROM notepads
                WHERE id LIKE ?1 ESCAPE '\'
                ORDER BY updated_at DESC, id ASC
                "#,
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![like], row_to_document)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        rows.into_iter().map(into_document).collect()
    }

    async fn exists(&self, id: &DocumentId) -> Result<bool, StorageError> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notepads WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(count > 0)
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let conn = self.conn.lock();

        let (count, size): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(id AS BLOB)) + LENGTH(CAST(content AS BLOB))), 0) FROM notepads",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;

        Ok(StorageStats {
            document_count: count as usize,
            total_size_bytes: size as usize,
        })
    }
}
