//! A notepad: one edit session plus live change and cursor traffic
//!
//! `Notepad::open` wires an [`EditSession`] and a [`CursorBroadcaster`] to a
//! document store and a change channel, then runs a task that feeds channel
//! events into both. A channel that cannot be subscribed only costs live
//! updates; the notepad still opens.

use crate::config::SyncConfig;
use crate::cursor::CursorBroadcaster;
use crate::error::SyncResult;
use crate::session::{EditSession, SessionEvent};
use padsync_core::{ChangeChannel, ChannelEvent, DocumentId, Participant, ParticipantId, PresenceMember, Subscription};
use padsync_storage::Storage;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Roster = Arc<Mutex<BTreeMap<ParticipantId, PresenceMember>>>;

/// An open notepad
pub struct Notepad {
    session: Arc<EditSession>,
    cursors: Arc<CursorBroadcaster>,
    channel: Arc<dyn ChangeChannel>,
    roster: Roster,
    tasks: Vec<JoinHandle<()>>,
    live: bool,
}

impl Notepad {
    /// Open a notepad as a freshly generated participant
    pub async fn open(
        id: DocumentId,
        store: Arc<dyn Storage>,
        channel: Arc<dyn ChangeChannel>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::open_as(id, store, channel, config, Participant::random()).await
    }

    pub async fn open_as(
        id: DocumentId,
        store: Arc<dyn Storage>,
        channel: Arc<dyn ChangeChannel>,
        config: SyncConfig,
        me: Participant,
    ) -> SyncResult<Self> {
        // Subscribe before loading so a change committed during the load is
        // still delivered once the session is ready
        let sub = match channel.subscribe(&id).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(doc_id = %id, error = %e, "Live updates unavailable");
                None
            }
        };

        let session = Arc::new(EditSession::new(id.clone(), store, config.clone()));
        if let Err(e) = session.initialize().await {
            if sub.is_some() {
                let _ = channel.unsubscribe(&id).await;
            }
            return Err(e);
        }

        let cursors = Arc::new(CursorBroadcaster::new(id.clone(), me, channel.clone(), config));
        let roster: Roster = Arc::default();
        let mut tasks = Vec::new();

        let live = sub.is_some();
        if let Some(sub) = sub {
            tasks.push(tokio::spawn(pump(sub, session.clone(), cursors.clone(), roster.clone())));
        }

        cursors.announce().await;
        tasks.push(cursors.spawn_frame_loop());
        if let Some(sweep) = cursors.spawn_stale_sweep() {
            tasks.push(sweep);
        }

        info!(doc_id = %id, participant = %cursors.participant().id, live, "Notepad open");

        Ok(Self {
            session,
            cursors,
            channel,
            roster,
            tasks,
            live,
        })
    }

    pub fn document_id(&self) -> &DocumentId {
        self.session.document_id()
    }

    pub fn session(&self) -> &Arc<EditSession> {
        &self.session
    }

    pub fn cursors(&self) -> &Arc<CursorBroadcaster> {
        &self.cursors
    }

    /// Current visible content
    pub fn content(&self) -> String {
        self.session.visible()
    }

    pub fn edit(&self, content: impl Into<String>) {
        self.session.local_edit(content);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe_events()
    }

    /// Other participants seen on this document
    pub fn members(&self) -> Vec<PresenceMember> {
        self.roster.lock().values().cloned().collect()
    }

    /// Whether change notifications are flowing
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Stop background work, withdraw presence and close the session
    pub async fn close(mut self) {
        self.stop_tasks();
        self.cursors.leave().await;
        if self.live {
            if let Err(e) = self.channel.unsubscribe(self.document_id()).await {
                warn!(doc_id = %self.document_id(), error = %e, "Failed to unsubscribe");
            }
        }
        self.session.close();
        debug!(doc_id = %self.document_id(), "Notepad closed");
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Notepad {
    fn drop(&mut self) {
        self.stop_tasks();
        self.session.close();
    }
}

async fn pump(mut sub: Subscription, session: Arc<EditSession>, cursors: Arc<CursorBroadcaster>, roster: Roster) {
    let me = cursors.participant().id.clone();

    while let Some(event) = sub.recv().await {
        match event {
            ChannelEvent::Change { content, .. } => {
                let outcome = session.remote_change(&content);
                debug!(doc_id = %sub.document_id(), ?outcome, "Change notification");
            }
            ChannelEvent::Cursor { payload, .. } => {
                if payload.participant_id != me {
                    roster
                        .lock()
                        .entry(payload.participant_id.clone())
                        .or_insert_with(|| PresenceMember {
                            participant_id: payload.participant_id.clone(),
                            display_name: payload.display_name.clone(),
                            color: payload.color.clone(),
                        });
                }
                cursors.on_remote_broadcast(payload);
            }
            ChannelEvent::Join { member, .. } => {
                if member.participant_id != me {
                    roster.lock().insert(member.participant_id.clone(), member);
                }
            }
            ChannelEvent::Leave { participant_id, .. } => {
                roster.lock().remove(&participant_id);
                cursors.on_participant_leave(&participant_id);
            }
        }
    }

    debug!(doc_id = %sub.document_id(), "Channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::session::tests::FlakyStore;
    use crate::cursor::SurfaceRect;
    use async_trait::async_trait;
    use padsync_core::{ChannelError, ChannelHub, CursorPayload, Document};
    use padsync_storage::{InsertOutcome, MemoryStorage, NotifyingStorage, StorageError, StorageStats};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Backend {
        hub: Arc<ChannelHub>,
        store: Arc<NotifyingStorage>,
    }

    impl Backend {
        fn new() -> Self {
            let hub = Arc::new(ChannelHub::new());
            let store = Arc::new(NotifyingStorage::new(Arc::new(MemoryStorage::new()), hub.clone()));
            Self { hub, store }
        }

        async fn open(&self) -> Notepad {
            Notepad::open(doc(), self.store.clone(), self.hub.clone(), SyncConfig::default())
                .await
                .unwrap()
        }

        async fn stored(&self) -> String {
            self.store.read(&doc()).await.unwrap().unwrap().content
        }
    }

    fn doc() -> DocumentId {
        DocumentId::new("abc123").unwrap()
    }

    async fn ms(n: u64) {
        tokio::time::sleep(Duration::from_millis(n)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_new_viewer_sees_saved_content() {
        let backend = Backend::new();

        let a = backend.open().await;
        assert_eq!(a.content(), "");
        assert_eq!(backend.stored().await, "");

        a.edit("Hello");
        ms(1100).await;
        assert_eq!(backend.stored().await, "Hello");

        let b = backend.open().await;
        assert_eq!(b.content(), "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_edits_propagate() {
        let backend = Backend::new();
        let a = backend.open().await;
        let b = backend.open().await;

        a.edit("from A");
        ms(1100).await;
        assert_eq!(b.content(), "from A");

        b.edit("from B");
        ms(1100).await;
        assert_eq!(a.content(), "from B");
        assert_eq!(a.session().notice(), None);
        assert_eq!(b.session().notice(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_edits_converge_to_last_commit() {
        let backend = Backend::new();
        let a = backend.open().await;
        let b = backend.open().await;

        a.edit("A typed this");
        b.edit("B typed that");
        ms(1500).await;

        let winner = backend.stored().await;
        assert!(winner == "A typed this" || winner == "B typed that");
        assert_eq!(a.content(), winner);
        assert_eq!(b.content(), winner);
        assert!(!a.session().is_dirty());
        assert!(!b.session().is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_and_roster_cleared_on_leave() {
        let backend = Backend::new();
        let a = backend.open().await;
        let b = backend.open().await;
        let b_id = b.cursors().participant().id.clone();

        ms(20).await;
        assert_eq!(a.members().len(), 1);

        b.cursors().pointer_moved(120.0, 80.0, SurfaceRect::new(20.0, 30.0));
        ms(50).await;

        let seen = a.cursors().cursors();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload.participant_id, b_id);
        assert_eq!((seen[0].payload.x, seen[0].payload.y), (100.0, 50.0));
        // B never sees itself
        assert!(b.cursors().cursors().is_empty());

        b.close().await;
        ms(20).await;
        assert!(a.cursors().cursors().is_empty());
        assert!(a.members().is_empty());
        assert!(backend.hub.members(&doc()).iter().all(|m| m.participant_id != b_id));
    }

    struct DeadChannel;

    #[async_trait]
    impl ChangeChannel for DeadChannel {
        async fn subscribe(&self, _id: &DocumentId) -> Result<Subscription, ChannelError> {
            Err(ChannelError::Transport("connection refused".into()))
        }

        async fn unsubscribe(&self, _id: &DocumentId) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }

        async fn publish_cursor(&self, _id: &DocumentId, _payload: CursorPayload) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }

        async fn announce(&self, _id: &DocumentId, _member: PresenceMember) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }

        async fn leave(&self, _id: &DocumentId, _participant_id: &ParticipantId) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_without_channel() {
        let store = Arc::new(MemoryStorage::new());
        let pad = Notepad::open(doc(), store.clone(), Arc::new(DeadChannel), SyncConfig::default())
            .await
            .unwrap();
        assert!(!pad.is_live());

        pad.cursors().pointer_moved(5.0, 5.0, SurfaceRect::default());
        pad.edit("still saved");
        ms(1100).await;

        assert_eq!(store.read(&doc()).await.unwrap().unwrap().content, "still saved");
        pad.close().await;
    }

    /// Commits a write from another client right after serving the first read
    struct RacingStore {
        inner: Arc<NotifyingStorage>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl Storage for RacingStore {
        async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
            let doc = self.inner.read(id).await?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.update(id, "written by A meanwhile").await?;
            }
            Ok(doc)
        }

        async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
            self.inner.insert_if_absent(id, content).await
        }

        async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
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

    #[tokio::test(start_paused = true)]
    async fn test_change_committed_during_load_is_applied() {
        let backend = Backend::new();
        backend.store.insert_if_absent(&doc(), "old").await.unwrap();
        let racing = Arc::new(RacingStore {
            inner: backend.store.clone(),
            raced: AtomicBool::new(false),
        });

        let b = Notepad::open(doc(), racing, backend.hub.clone(), SyncConfig::default())
            .await
            .unwrap();
        ms(20).await;

        assert_eq!(backend.stored().await, "written by A meanwhile");
        assert_eq!(b.content(), "written by A meanwhile");
        assert!(!b.session().is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_returned() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);

        let result = Notepad::open(doc(), store, Arc::new(ChannelHub::new()), SyncConfig::default()).await;
        assert!(matches!(result, Err(SyncError::Initialization(_))));
    }
}
