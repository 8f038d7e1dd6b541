//! Change-publishing storage wrapper

use crate::{InsertOutcome, Storage, StorageError, StorageStats};
use async_trait::async_trait;
use dashmap::DashMap;
use padsync_core::{ChannelHub, Document, DocumentId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Storage wrapper that publishes a `Change` event for every committed update.
///
/// Updates to one document are serialized by a per-document async lock held
/// across commit and publish, so subscribers see change notifications in
/// commit order. Updates to different documents do not contend.
pub struct NotifyingStorage {
    inner: Arc<dyn Storage>,
    hub: Arc<ChannelHub>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NotifyingStorage {
    pub fn new(inner: Arc<dyn Storage>, hub: Arc<ChannelHub>) -> Self {
        Self {
            inner,
            hub,
            locks: DashMap::new(),
        }
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    fn lock_for<'a>(&'a self, id: &'a DocumentId) -> LockEntry<'a> {
        let lock = self.locks.entry(id.as_str().to_string()).or_default().clone();
        LockEntry {
            locks: &self.locks,
            key: id.as_str(),
            lock: Some(lock),
        }
    }
}

/// A handle on one document's lock. Dropping it (also when the update future
/// is cancelled) removes the map entry once nobody else holds or waits on it.
struct LockEntry<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Option<Arc<Mutex<()>>>,
}

impl LockEntry<'_> {
    async fn acquire(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.locks.remove_if(self.key, |_, l| Arc::strong_count(l) == 1);
    }
}

#[async_trait]
impl Storage for NotifyingStorage {
    async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        self.inner.read(id).await
    }

    async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
        self.inner.insert_if_absent(id, content).await
    }

    async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
        let entry = self.lock_for(id);
        let _guard = entry.acquire().await;

        let result = self.inner.update(id, content).await;
        match &result {
            Ok(doc) => self.hub.publish_change(&doc.id, doc.content.clone()),
            Err(e) => debug!(doc_id = %id, error = %e, "Update not committed, nothing published"),
        }
        result
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        self.inner.delete(id).await
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<Document>, StorageError> {
        self.inner.list(pattern).await
    }

    async fn exists(&self, id: &DocumentId) -> Result<bool, StorageError> {
        self.inner.exists(id).await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        self.inner.stats().await
    }
}
