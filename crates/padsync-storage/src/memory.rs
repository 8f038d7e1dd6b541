//! In-memory storage backend

use crate::{matches_pattern, InsertOutcome, Storage, StorageError, StorageStats};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use padsync_core::{Document, DocumentId};

/// In-memory storage backend
///
/// Fast, volatile storage suitable for development, tests and embedded use.
/// Data is lost when the process exits.
pub struct MemoryStorage {
    data: DashMap<String, Document>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        Ok(self.data.get(id.as_str()).map(|entry| entry.value().clone()))
    }

    async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
        // The entry guard holds the shard lock, so check-and-insert is atomic
        match self.data.entry(id.as_str().to_string()) {
            Entry::Occupied(_) => Ok(InsertOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                let doc = Document::new(id.clone(), content);
                slot.insert(doc.clone());
                Ok(InsertOutcome::Inserted(doc))
            }
        }
    }

    async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
        match self.data.get_mut(id.as_str()) {
            Some(mut entry) => {
                entry.set_content(content);
                Ok(entry.value().clone())
            }
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        Ok(self.data.remove(id.as_str()).is_some())
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<Document>, StorageError> {
        let mut docs: Vec<Document> = self
            .data
            .iter()
            .filter(|entry| pattern.map_or(true, |p| matches_pattern(entry.key(), p)))
            .map(|entry| entry.value().clone())
            .collect();

        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn exists(&self, id: &DocumentId) -> Result<bool, StorageError> {
        Ok(self.data.contains_key(id.as_str()))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            document_count: self.data.len(),
            total_size_bytes: self.data.iter().map(|entry| entry.value().size()).sum(),
        })
    }
}
