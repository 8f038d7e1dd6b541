//! Change channel abstraction
//!
//! A change channel is a publish/subscribe primitive keyed by document id. It
//! carries two kinds of traffic:
//! - row-level change notifications, delivered in commit order per document
//! - ephemeral broadcasts (cursor positions, presence join/leave) with no
//!   delivery guarantee

use crate::document::DocumentId;
use crate::presence::{CursorPayload, ParticipantId, PresenceMember};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// An event delivered on a document channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A committed write replaced the document content
    Change {
        document_id: DocumentId,
        content: String,
    },
    /// A participant moved their pointer
    Cursor {
        document_id: DocumentId,
        payload: CursorPayload,
    },
    /// A participant joined the document channel
    Join {
        document_id: DocumentId,
        member: PresenceMember,
    },
    /// A participant left the document channel
    Leave {
        document_id: DocumentId,
        participant_id: ParticipantId,
    },
}

impl ChannelEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            ChannelEvent::Change { document_id, .. }
            | ChannelEvent::Cursor { document_id, .. }
            | ChannelEvent::Join { document_id, .. }
            | ChannelEvent::Leave { document_id, .. } => document_id,
        }
    }

    /// Ephemeral events may be dropped under load
    pub fn is_ephemeral(&self) -> bool {
        !matches!(self, ChannelEvent::Change { .. })
    }
}

/// An event tagged with the connection that caused it (if any)
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: Option<String>,
    pub event: ChannelEvent,
}

/// Channel errors. These are never fatal to an editing session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by server: {code} {message}")]
    Rejected { code: String, message: String },
}

/// Receiving half of a document subscription
pub struct Subscription {
    document_id: DocumentId,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn new(document_id: DocumentId, rx: broadcast::Receiver<Envelope>) -> Self {
        Self { document_id, rx }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Wait for the next event on this document.
    ///
    /// Returns `None` once the channel is closed. Lagging skips the missed
    /// events with a warning; the next change notification carries the full
    /// content, so nothing needs replaying.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if envelope.event.document_id() == &self.document_id {
                        return Some(envelope.event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(doc_id = %self.document_id, missed = n, "Subscription lagged behind channel");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if envelope.event.document_id() == &self.document_id {
                        return Some(envelope.event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(doc_id = %self.document_id, missed = n, "Subscription lagged behind channel");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Publish/subscribe primitive keyed by document id
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    /// Subscribe to change notifications, cursor broadcasts and presence for a document
    async fn subscribe(&self, id: &DocumentId) -> Result<Subscription, ChannelError>;

    /// Release a subscription
    async fn unsubscribe(&self, id: &DocumentId) -> Result<(), ChannelError>;

    /// Broadcast a cursor position (at-most-once, no acknowledgment semantics)
    async fn publish_cursor(&self, id: &DocumentId, payload: CursorPayload) -> Result<(), ChannelError>;

    /// Announce presence on a document
    async fn announce(&self, id: &DocumentId, member: PresenceMember) -> Result<(), ChannelError>;

    /// Withdraw presence from a document
    async fn leave(&self, id: &DocumentId, participant_id: &ParticipantId) -> Result<(), ChannelError>;
}
