//! The editing session: last-writer-wins sync with debounced persistence
//!
//! A session owns the local view of one document. Local edits update the
//! visible buffer at once and are written to the store after a quiet period.
//! Remote changes replace the buffer wholesale unless they are the echo of a
//! value this session already holds. There is no merge: whichever write the
//! store commits last is what every session converges to.

use crate::config::SyncConfig;
use crate::error::{Notice, SyncError, SyncResult};
use padsync_core::DocumentId;
use padsync_storage::{InsertOutcome, Storage, StorageError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Lifecycle of an [`EditSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// What [`EditSession::remote_change`] did with an incoming value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The buffer was replaced
    Applied,
    /// The value is one this session already holds or is writing
    Echo,
    /// The session is not ready
    Ignored,
}

/// Notifications for whoever renders the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Loaded { content: String },
    BufferChanged,
    Saved { content: String },
    RemoteApplied { content: String },
    Failed(Notice),
}

struct SessionInner {
    state: SessionState,
    last_persisted: String,
    visible: String,
    in_flight: Option<String>,
    remote_epoch: u64,
    notice: Option<Notice>,
}

struct Shared {
    id: DocumentId,
    store: Arc<dyn Storage>,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Write the current buffer if it differs from the last persisted value
    async fn persist(&self) -> Result<(), StorageError> {
        let (content, epoch) = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Ready {
                return Ok(());
            }
            if inner.visible == inner.last_persisted {
                debug!(doc_id = %self.id, "Buffer matches last persisted value, skipping write");
                return Ok(());
            }
            let content = inner.visible.clone();
            inner.in_flight = Some(content.clone());
            (content, inner.remote_epoch)
        };

        debug!(doc_id = %self.id, bytes = content.len(), "Writing buffer");
        let result = self.store.update(&self.id, &content).await;

        let (event, outcome) = {
            let mut inner = self.inner.lock();
            inner.in_flight = None;
            if inner.state == SessionState::Closed {
                return Ok(());
            }

            match result {
                Ok(_) => {
                    // A remote value applied mid-flight is newer than what we wrote
                    if inner.remote_epoch == epoch {
                        inner.last_persisted = content.clone();
                    }
                    if matches!(inner.notice, Some(Notice::SaveFailed(_))) {
                        inner.notice = None;
                    }
                    (SessionEvent::Saved { content }, Ok(()))
                }
                Err(e) => {
                    warn!(doc_id = %self.id, error = %e, "Failed to save document");
                    let notice = Notice::SaveFailed(e.to_string());
                    inner.notice = Some(notice.clone());
                    (SessionEvent::Failed(notice), Err(e))
                }
            }
        };

        self.emit(event);
        outcome
    }
}

/// Local editing session for one document
pub struct EditSession {
    shared: Arc<Shared>,
    config: SyncConfig,
    poke: Mutex<Option<watch::Sender<u64>>>,
}

impl EditSession {
    pub fn new(id: DocumentId, store: Arc<dyn Storage>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                id,
                store,
                inner: Mutex::new(SessionInner {
                    state: SessionState::Uninitialized,
                    last_persisted: String::new(),
                    visible: String::new(),
                    in_flight: None,
                    remote_epoch: 0,
                    notice: None,
                }),
                events,
            }),
            config,
            poke: Mutex::new(None),
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.shared.id
    }

    /// Load the document, creating it empty if no row exists.
    ///
    /// Returns the baseline content. On failure the session goes back to
    /// `Uninitialized` so the caller may retry.
    pub async fn initialize(&self) -> SyncResult<String> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Uninitialized {
                return Err(SyncError::InvalidState("session is already initialized"));
            }
            inner.state = SessionState::Initializing;
        }

        match self.load().await {
            Ok(baseline) => {
                {
                    let mut inner = self.shared.inner.lock();
                    if inner.state == SessionState::Closed {
                        return Err(SyncError::InvalidState("session closed while loading"));
                    }
                    inner.state = SessionState::Ready;
                    inner.last_persisted = baseline.clone();
                    inner.visible = baseline.clone();
                    inner.notice = None;
                }
                self.start_persister();
                info!(doc_id = %self.shared.id, bytes = baseline.len(), "Session ready");
                self.shared.emit(SessionEvent::Loaded {
                    content: baseline.clone(),
                });
                Ok(baseline)
            }
            Err(e) => {
                warn!(doc_id = %self.shared.id, error = %e, "Failed to load document");
                let notice = Notice::LoadFailed(e.to_string());
                {
                    let mut inner = self.shared.inner.lock();
                    if inner.state == SessionState::Initializing {
                        inner.state = SessionState::Uninitialized;
                    }
                    inner.notice = Some(notice.clone());
                }
                self.shared.emit(SessionEvent::Failed(notice));
                Err(SyncError::Initialization(e))
            }
        }
    }

    async fn load(&self) -> Result<String, StorageError> {
        let id = &self.shared.id;
        let store = &self.shared.store;

        if let Some(doc) = store.read(id).await? {
            return Ok(doc.content);
        }

        match store.insert_if_absent(id, "").await? {
            InsertOutcome::Inserted(doc) => {
                info!(doc_id = %id, "Created empty document");
                Ok(doc.content)
            }
            InsertOutcome::AlreadyExists => {
                debug!(doc_id = %id, "Document created concurrently, re-reading");
                store
                    .read(id)
                    .await?
                    .map(|doc| doc.content)
                    .ok_or_else(|| StorageError::NotFound(id.to_string()))
            }
        }
    }

    fn start_persister(&self) {
        let (tx, rx) = watch::channel(0u64);
        *self.poke.lock() = Some(tx);
        tokio::spawn(run_persister(self.shared.clone(), rx, self.config.debounce()));
    }

    /// Apply a local edit. The write happens after the debounce window.
    pub fn local_edit(&self, content: impl Into<String>) {
        let ready = {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.visible = content.into();
            inner.state == SessionState::Ready
        };
        self.shared.emit(SessionEvent::BufferChanged);

        if ready {
            if let Some(tx) = self.poke.lock().as_ref() {
                tx.send_modify(|n| *n = n.wrapping_add(1));
            }
        }
    }

    /// Reconcile a change notification from the channel
    pub fn remote_change(&self, content: &str) -> RemoteOutcome {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Ready {
                return RemoteOutcome::Ignored;
            }
            if content == inner.last_persisted || inner.in_flight.as_deref() == Some(content) {
                return RemoteOutcome::Echo;
            }
            if inner.visible != inner.last_persisted {
                debug!(doc_id = %self.shared.id, "Remote change overwrites unsaved local edits");
            }
            inner.last_persisted = content.to_string();
            inner.visible = content.to_string();
            inner.remote_epoch += 1;
        }

        self.shared.emit(SessionEvent::RemoteApplied {
            content: content.to_string(),
        });
        RemoteOutcome::Applied
    }

    /// Write the buffer now instead of waiting for the debounce window
    pub async fn flush(&self) -> SyncResult<()> {
        if self.state() != SessionState::Ready {
            return Err(SyncError::InvalidState("session is not ready"));
        }
        self.shared.persist().await.map_err(SyncError::Persistence)
    }

    pub fn visible(&self) -> String {
        self.shared.inner.lock().visible.clone()
    }

    pub fn last_persisted(&self) -> String {
        self.shared.inner.lock().last_persisted.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Whether a write is in flight
    pub fn is_saving(&self) -> bool {
        self.shared.inner.lock().in_flight.is_some()
    }

    /// Whether the buffer holds edits not yet written
    pub fn is_dirty(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.visible != inner.last_persisted
    }

    pub fn notice(&self) -> Option<Notice> {
        self.shared.inner.lock().notice.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Tear the session down. A pending debounced write is cancelled; a write
    /// already in flight completes without touching session state.
    pub fn close(&self) {
        self.shared.inner.lock().state = SessionState::Closed;
        self.poke.lock().take();
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_persister(shared: Arc<Shared>, mut pokes: watch::Receiver<u64>, debounce: Duration) {
    loop {
        if pokes.changed().await.is_err() {
            break;
        }

        // Every poke restarts the window
        loop {
            tokio::select! {
                changed = pokes.changed() => {
                    if changed.is_err() {
                        debug!(doc_id = %shared.id, "Session closed, dropping pending write");
                        return;
                    }
                }
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        // Failures are already on the session as a notice
        let _ = shared.persist().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use padsync_core::Document;
    use padsync_storage::{MemoryStorage, StorageStats};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store that records writes and can be told to fail or stall
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStorage,
        pub writes: Mutex<Vec<String>>,
        pub attempts: AtomicUsize,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        pub write_delay: Mutex<Duration>,
    }

    impl FlakyStore {
        pub fn write_count(&self) -> usize {
            self.writes.lock().len()
        }
    }

    #[async_trait]
    impl Storage for FlakyStore {
        async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Connection("store unreachable".into()));
            }
            self.inner.read(id).await
        }

        async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
            self.inner.insert_if_absent(id, content).await
        }

        async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.write_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Connection("store unreachable".into()));
            }
            self.writes.lock().push(content.to_string());
            self.inner.update(id, content).await
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

    fn doc_id() -> DocumentId {
        DocumentId::new("abc123").unwrap()
    }

    fn session(store: &Arc<FlakyStore>) -> EditSession {
        EditSession::new(doc_id(), store.clone(), SyncConfig::default())
    }

    async fn stored(store: &FlakyStore) -> Option<String> {
        store.read(&doc_id()).await.unwrap().map(|doc| doc.content)
    }

    async fn ms(n: u64) {
        tokio::time::sleep(Duration::from_millis(n)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_creates_missing_document() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);

        assert_eq!(s.initialize().await.unwrap(), "");
        assert_eq!(s.state(), SessionState::Ready);
        assert_eq!(stored(&store).await.as_deref(), Some(""));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_loads_existing_content() {
        let store = Arc::new(FlakyStore::default());
        store.insert_if_absent(&doc_id(), "Hello").await.unwrap();

        let s = session(&store);
        assert_eq!(s.initialize().await.unwrap(), "Hello");
        assert_eq!(s.visible(), "Hello");
        assert_eq!(s.last_persisted(), "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_initialize_creates_one_row() {
        let store = Arc::new(FlakyStore::default());
        let a = session(&store);
        let b = session(&store);

        let (ra, rb) = tokio::join!(a.initialize(), b.initialize());
        assert_eq!(ra.unwrap(), "");
        assert_eq!(rb.unwrap(), "");
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_twice_is_rejected() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();
        assert!(matches!(s.initialize().await, Err(SyncError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_sets_notice_and_allows_retry() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let s = session(&store);
        let mut events = s.subscribe_events();

        assert!(matches!(s.initialize().await, Err(SyncError::Initialization(_))));
        assert_eq!(s.state(), SessionState::Uninitialized);
        assert!(matches!(s.notice(), Some(Notice::LoadFailed(_))));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Failed(Notice::LoadFailed(_))));

        store.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(s.initialize().await.unwrap(), "");
        assert_eq!(s.notice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_edits() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            s.local_edit(text);
            ms(200).await;
        }
        assert_eq!(s.visible(), "Hello");

        // 200ms into the quiet period after the last edit
        assert_eq!(store.write_count(), 0);

        ms(900).await;
        assert_eq!(*store.writes.lock(), vec!["Hello".to_string()]);
        assert_eq!(s.last_persisted(), "Hello");
        assert_eq!(stored(&store).await.as_deref(), Some("Hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_edit_is_not_written() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("");
        ms(1500).await;
        assert_eq!(store.write_count(), 0);

        // Typed then reverted inside one window
        s.local_edit("x");
        ms(100).await;
        s.local_edit("");
        ms(1500).await;
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_before_ready_are_not_persisted() {
        let store = Arc::new(FlakyStore::default());
        store.insert_if_absent(&doc_id(), "stored").await.unwrap();
        let s = session(&store);

        s.local_edit("typed too early");
        assert_eq!(s.visible(), "typed too early");

        s.initialize().await.unwrap();
        assert_eq!(s.visible(), "stored");
        ms(1500).await;
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_echo_leaves_buffer_untouched() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("Hello");
        ms(1100).await;
        assert_eq!(s.last_persisted(), "Hello");

        let mut events = s.subscribe_events();
        assert_eq!(s.remote_change("Hello"), RemoteOutcome::Echo);
        assert_eq!(s.visible(), "Hello");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_during_write_is_suppressed() {
        let store = Arc::new(FlakyStore::default());
        *store.write_delay.lock() = Duration::from_millis(300);
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("Hello");
        ms(1100).await;
        assert!(s.is_saving());

        // Typing continued while the write was out
        s.local_edit("Hello, world");
        assert_eq!(s.remote_change("Hello"), RemoteOutcome::Echo);
        assert_eq!(s.visible(), "Hello, world");

        ms(300).await;
        assert!(!s.is_saving());
        assert_eq!(s.last_persisted(), "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_replaces_unsaved_edits() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("local draft");
        assert_eq!(s.remote_change("from elsewhere"), RemoteOutcome::Applied);
        assert_eq!(s.visible(), "from elsewhere");
        assert_eq!(s.last_persisted(), "from elsewhere");

        // The overwritten draft is never written back
        ms(1500).await;
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_during_write_wins() {
        let store = Arc::new(FlakyStore::default());
        *store.write_delay.lock() = Duration::from_millis(300);
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("mine");
        ms(1100).await;
        assert!(s.is_saving());

        assert_eq!(s.remote_change("theirs"), RemoteOutcome::Applied);
        ms(300).await;

        assert_eq!(s.visible(), "theirs");
        assert_eq!(s.last_persisted(), "theirs");
        // Our own change notification arrives afterwards and is applied
        assert_eq!(s.remote_change("mine"), RemoteOutcome::Applied);
        assert_eq!(s.visible(), "mine");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_change_ignored_before_ready() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        assert_eq!(s.remote_change("early"), RemoteOutcome::Ignored);
        assert_eq!(s.visible(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_keeps_buffer_and_sets_notice() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();
        store.fail_writes.store(true, Ordering::SeqCst);

        s.local_edit("unsaved");
        ms(1100).await;

        assert_eq!(s.visible(), "unsaved");
        assert_eq!(s.last_persisted(), "");
        assert!(matches!(s.notice(), Some(Notice::SaveFailed(_))));
        assert!(s.is_dirty());

        // No automatic retry
        ms(5000).await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);

        // The next edit writes again and clears the notice
        store.fail_writes.store(false, Ordering::SeqCst);
        s.local_edit("unsaved!");
        ms(1100).await;
        assert_eq!(s.last_persisted(), "unsaved!");
        assert_eq!(s.notice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_write() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("never saved");
        ms(500).await;
        s.close();
        ms(2000).await;

        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(store.write_count(), 0);
        assert_eq!(s.remote_change("x"), RemoteOutcome::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        s.initialize().await.unwrap();

        s.local_edit("now");
        s.flush().await.unwrap();
        assert_eq!(stored(&store).await.as_deref(), Some("now"));

        // The debounced write finds nothing left to do
        ms(1500).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_session() {
        let store = Arc::new(FlakyStore::default());
        let s = session(&store);
        let mut events = s.subscribe_events();

        s.initialize().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Loaded { content: String::new() });

        s.local_edit("a");
        assert_eq!(events.recv().await.unwrap(), SessionEvent::BufferChanged);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Saved { content: "a".into() });

        assert_eq!(s.remote_change("b"), RemoteOutcome::Applied);
        assert_eq!(events.recv().await.unwrap(), SessionEvent::RemoteApplied { content: "b".into() });
    }
}
