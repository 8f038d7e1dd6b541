//! Channel hub - in-process change channel with presence bookkeeping

use crate::channel::{ChangeChannel, ChannelError, ChannelEvent, Envelope, Subscription};
use crate::document::{now_millis, DocumentId};
use crate::presence::{CursorPayload, ParticipantId, PresenceMember};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast buffer size
pub const DEFAULT_CAPACITY: usize = 10_000;

/// A participant present on a document, owned by one client connection
#[derive(Debug, Clone)]
struct PresenceEntry {
    client_id: String,
    member: PresenceMember,
    last_seen: u64,
}

/// Fan-out point for every document channel.
///
/// One broadcast channel carries all events; subscribers filter by document
/// id. Presence is tracked per document so that a disconnecting client can
/// be turned into `Leave` events for everyone else.
pub struct ChannelHub {
    sender: broadcast::Sender<Envelope>,
    presence: DashMap<String, Vec<PresenceEntry>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            presence: DashMap::new(),
        }
    }

    /// Raw receiver for every event on every document
    pub fn subscribe_all(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Receiver filtered to one document
    pub fn subscribe_document(&self, id: &DocumentId) -> Subscription {
        Subscription::new(id.clone(), self.sender.subscribe())
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, origin: Option<&str>, event: ChannelEvent) {
        let _ = self.sender.send(Envelope {
            origin: origin.map(str::to_string),
            event,
        });
    }

    /// Publish a committed content change
    pub fn publish_change(&self, id: &DocumentId, content: impl Into<String>) {
        debug!(doc_id = %id, "Publishing change notification");
        self.publish(
            None,
            ChannelEvent::Change {
                document_id: id.clone(),
                content: content.into(),
            },
        );
    }

    /// Relay a cursor broadcast and refresh the sender's presence
    pub fn publish_cursor_from(&self, client_id: &str, id: &DocumentId, payload: CursorPayload) {
        if let Some(mut entries) = self.presence.get_mut(id.as_str()) {
            let now = now_millis();
            for entry in entries.iter_mut() {
                if entry.client_id == client_id && entry.member.participant_id == payload.participant_id {
                    entry.last_seen = now;
                }
            }
        }

        self.publish(
            Some(client_id),
            ChannelEvent::Cursor {
                document_id: id.clone(),
                payload,
            },
        );
    }

    /// Record presence for a client and announce it
    pub fn set_presence(&self, client_id: &str, id: &DocumentId, member: PresenceMember) {
        let entry = PresenceEntry {
            client_id: client_id.to_string(),
            member: member.clone(),
            last_seen: now_millis(),
        };

        {
            let mut entries = self.presence.entry(id.as_str().to_string()).or_default();
            entries.retain(|p| p.member.participant_id != member.participant_id);
            entries.push(entry);
        }

        self.publish(
            Some(client_id),
            ChannelEvent::Join {
                document_id: id.clone(),
                member,
            },
        );
    }

    /// Remove one participant from a document, announcing the leave if it was present
    pub fn remove_presence(&self, client_id: &str, id: &DocumentId, participant_id: &ParticipantId) -> bool {
        let removed = match self.presence.get_mut(id.as_str()) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|p| !(p.client_id == client_id && &p.member.participant_id == participant_id));
                entries.len() != before
            }
            None => false,
        };

        if removed {
            self.publish(
                Some(client_id),
                ChannelEvent::Leave {
                    document_id: id.clone(),
                    participant_id: participant_id.clone(),
                },
            );
        }

        removed
    }

    /// Remove every presence a client held, announcing a leave for each.
    /// Returns the number of entries removed.
    pub fn remove_client(&self, client_id: &str) -> usize {
        self.drain_presence(|entry| entry.client_id == client_id)
    }

    /// Remove presence entries not refreshed within `max_age_ms`.
    /// Catches participants whose connection vanished without a clean close.
    pub fn sweep_stale(&self, max_age_ms: u64) -> usize {
        let cutoff = now_millis().saturating_sub(max_age_ms);
        self.drain_presence(|entry| entry.last_seen < cutoff)
    }

    fn drain_presence(&self, predicate: impl Fn(&PresenceEntry) -> bool) -> usize {
        let mut left = Vec::new();

        for mut entry in self.presence.iter_mut() {
            let key = entry.key().clone();
            entry.value_mut().retain(|p| {
                if predicate(p) {
                    left.push((key.clone(), p.client_id.clone(), p.member.participant_id.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.presence.retain(|_, entries| !entries.is_empty());

        let count = left.len();
        for (key, client_id, participant_id) in left {
            if let Ok(document_id) = DocumentId::new(key) {
                self.publish(
                    Some(&client_id),
                    ChannelEvent::Leave {
                        document_id,
                        participant_id,
                    },
                );
            }
        }

        count
    }

    /// Members currently present on a document
    pub fn members(&self, id: &DocumentId) -> Vec<PresenceMember> {
        self.presence
            .get(id.as_str())
            .map(|r| r.value().iter().map(|p| p.member.clone()).collect())
            .unwrap_or_default()
    }

    /// Get statistics
    pub fn stats(&self) -> HubStats {
        HubStats {
            subscriber_count: self.sender.receiver_count(),
            documents_with_presence: self.presence.len(),
            presence_count: self.presence.iter().map(|e| e.value().len()).sum(),
        }
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics
#[derive(Debug, Clone)]
pub struct HubStats {
    pub subscriber_count: usize,
    pub documents_with_presence: usize,
    pub presence_count: usize,
}

/// In-process channel: every caller shares the hub directly. Presence is
/// owned by the participant itself, so the participant id doubles as the
/// client id.
#[async_trait]
impl ChangeChannel for ChannelHub {
    async fn subscribe(&self, id: &DocumentId) -> Result<Subscription, ChannelError> {
        Ok(self.subscribe_document(id))
    }

    async fn unsubscribe(&self, _id: &DocumentId) -> Result<(), ChannelError> {
        // Dropping the Subscription releases the receiver
        Ok(())
    }

    async fn publish_cursor(&self, id: &DocumentId, payload: CursorPayload) -> Result<(), ChannelError> {
        let client_id = payload.participant_id.as_str().to_string();
        self.publish_cursor_from(&client_id, id, payload);
        Ok(())
    }

    async fn announce(&self, id: &DocumentId, member: PresenceMember) -> Result<(), ChannelError> {
        let client_id = member.participant_id.as_str().to_string();
        self.set_presence(&client_id, id, member);
        Ok(())
    }

    async fn leave(&self, id: &DocumentId, participant_id: &ParticipantId) -> Result<(), ChannelError> {
        self.remove_presence(participant_id.as_str(), id, participant_id);
        Ok(())
    }
}
