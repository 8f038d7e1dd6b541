//! Ephemeral multi-cursor presence
//!
//! Local pointer moves are thresholded and coalesced to at most one broadcast
//! per frame. Remote cursors live in a map keyed by participant id that is
//! updated from channel broadcasts and emptied on leave. Nothing here is
//! persisted and nothing is acknowledged.

use crate::config::SyncConfig;
use padsync_core::{ChangeChannel, CursorPayload, DocumentId, Participant, ParticipantId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Editor-relative pointer position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Where the editing surface sits in client coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceRect {
    pub left: f64,
    pub top: f64,
}

impl SurfaceRect {
    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }

    pub fn relative(&self, client_x: f64, client_y: f64) -> Position {
        Position {
            x: client_x - self.left,
            y: client_y - self.top,
        }
    }
}

/// Threshold plus per-frame coalescing for outgoing pointer positions
#[derive(Debug)]
pub struct PointerThrottle {
    min_delta: f64,
    last_sent: Option<Position>,
    pending: Option<Position>,
}

impl PointerThrottle {
    pub fn new(min_delta: f64) -> Self {
        Self {
            min_delta,
            last_sent: None,
            pending: None,
        }
    }

    /// Record a move. Returns false when the move is below the threshold on
    /// both axes relative to the last position actually sent; any pending
    /// position is then dropped, since the pointer is back where peers see it.
    pub fn record(&mut self, position: Position) -> bool {
        if let Some(last) = self.last_sent {
            if (position.x - last.x).abs() < self.min_delta && (position.y - last.y).abs() < self.min_delta {
                self.pending = None;
                return false;
            }
        }
        self.pending = Some(position);
        true
    }

    /// The newest pending position, marked as sent
    pub fn take_frame(&mut self) -> Option<Position> {
        let position = self.pending.take()?;
        self.last_sent = Some(position);
        Some(position)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// A remote participant's cursor as last seen
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub payload: CursorPayload,
    pub last_seen: Instant,
}

/// Remote cursors by participant id
#[derive(Debug, Default)]
pub struct CursorMap {
    cursors: BTreeMap<ParticipantId, RemoteCursor>,
    version: u64,
}

impl CursorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the cursor for the payload's participant
    pub fn apply(&mut self, payload: CursorPayload, now: Instant) {
        self.cursors.insert(
            payload.participant_id.clone(),
            RemoteCursor {
                payload,
                last_seen: now,
            },
        );
        self.version += 1;
    }

    pub fn remove(&mut self, participant_id: &ParticipantId) -> bool {
        let removed = self.cursors.remove(participant_id).is_some();
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Drop cursors not refreshed within `ttl`, returning whose they were
    pub fn prune_stale(&mut self, now: Instant, ttl: Duration) -> Vec<ParticipantId> {
        let stale: Vec<ParticipantId> = self
            .cursors
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_seen) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.cursors.remove(id);
        }
        if !stale.is_empty() {
            self.version += 1;
        }
        stale
    }

    /// Cursors ordered by participant id
    pub fn snapshot(&self) -> Vec<RemoteCursor> {
        self.cursors.values().cloned().collect()
    }

    pub fn get(&self, participant_id: &ParticipantId) -> Option<&RemoteCursor> {
        self.cursors.get(participant_id)
    }

    /// Bumped on every change; a renderer redraws when it moves
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

/// Sends the local pointer and tracks everyone else's for one document
pub struct CursorBroadcaster {
    document_id: DocumentId,
    me: Participant,
    channel: Arc<dyn ChangeChannel>,
    config: SyncConfig,
    throttle: Mutex<PointerThrottle>,
    cursors: Mutex<CursorMap>,
}

impl CursorBroadcaster {
    pub fn new(document_id: DocumentId, me: Participant, channel: Arc<dyn ChangeChannel>, config: SyncConfig) -> Self {
        let throttle = PointerThrottle::new(config.min_cursor_delta);
        Self {
            document_id,
            me,
            channel,
            config,
            throttle: Mutex::new(throttle),
            cursors: Mutex::new(CursorMap::new()),
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.me
    }

    /// Feed a pointer move in client coordinates
    pub fn pointer_moved(&self, client_x: f64, client_y: f64, surface: SurfaceRect) -> bool {
        self.throttle.lock().record(surface.relative(client_x, client_y))
    }

    /// Publish at most one pending position. Returns whether one was sent.
    pub async fn flush_frame(&self) -> bool {
        let next = self.throttle.lock().take_frame();
        let Some(position) = next else {
            return false;
        };

        let payload = self.me.cursor_at(position.x, position.y);
        if let Err(e) = self.channel.publish_cursor(&self.document_id, payload).await {
            warn!(doc_id = %self.document_id, error = %e, "Failed to publish cursor");
            return false;
        }
        true
    }

    /// Flush once per frame until the handle is aborted
    pub fn spawn_frame_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.frame_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                this.flush_frame().await;
            }
        })
    }

    /// Periodically drop cursors that stopped updating, if a TTL is configured
    pub fn spawn_stale_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl = self.config.cursor_ttl()?;
        let this = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval((ttl / 2).max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let pruned = this.cursors.lock().prune_stale(Instant::now(), ttl);
                if !pruned.is_empty() {
                    debug!(doc_id = %this.document_id, count = pruned.len(), "Dropped stale cursors");
                }
            }
        }))
    }

    /// Apply a cursor broadcast from the channel. Our own is ignored.
    pub fn on_remote_broadcast(&self, payload: CursorPayload) -> bool {
        if payload.participant_id == self.me.id {
            return false;
        }
        self.cursors.lock().apply(payload, Instant::now());
        true
    }

    pub fn on_participant_leave(&self, participant_id: &ParticipantId) -> bool {
        self.cursors.lock().remove(participant_id)
    }

    /// Announce our presence on the document (no position yet)
    pub async fn announce(&self) {
        if let Err(e) = self.channel.announce(&self.document_id, self.me.member()).await {
            warn!(doc_id = %self.document_id, error = %e, "Failed to announce presence");
        }
    }

    /// Withdraw our presence
    pub async fn leave(&self) {
        if let Err(e) = self.channel.leave(&self.document_id, &self.me.id).await {
            warn!(doc_id = %self.document_id, error = %e, "Failed to announce leave");
        }
    }

    pub fn cursors(&self) -> Vec<RemoteCursor> {
        self.cursors.lock().snapshot()
    }

    pub fn version(&self) -> u64 {
        self.cursors.lock().version()
    }
}
