//! Shared server state handed to every connection

use crate::rate_limit::RateLimitConfig;
use padsync_core::ChannelHub;
use padsync_storage::{NotifyingStorage, Storage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Default lifetime of an admin grant
pub const DEFAULT_ADMIN_TTL: Duration = Duration::from_secs(15 * 60);

/// Admin gate settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret; `None` disables the gate entirely
    pub admin_secret: Option<String>,
    /// How long a successful AUTH stays valid, in seconds
    pub admin_ttl_secs: u64,
    /// Documents whose every command requires the admin grant
    pub protected_documents: HashSet<String>,
}

impl AuthConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            admin_secret: Some(secret.into()),
            ..Self::default()
        }
    }

    pub fn admin_ttl(&self) -> Duration {
        Duration::from_secs(self.admin_ttl_secs)
    }

    pub fn is_protected(&self, id: &str) -> bool {
        self.protected_documents.contains(id)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_secret: None,
            admin_ttl_secs: DEFAULT_ADMIN_TTL.as_secs(),
            protected_documents: HashSet::new(),
        }
    }
}

/// Countable things that happen while serving a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerEvent {
    DocumentCreated,
    DocumentDeleted,
    ContentWritten,
    CursorRelayed,
    CursorDropped,
    RateLimited,
    PresenceChanged,
}

/// Everything a connection needs: the store, the channel hub and policy.
///
/// The store is always wrapped in [`NotifyingStorage`], so every committed
/// update is published on the hub in commit order.
pub struct ServerContext {
    storage: Arc<NotifyingStorage>,
    hub: Arc<ChannelHub>,
    auth: AuthConfig,
    limits: RateLimitConfig,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<Metrics>>,
}

impl ServerContext {
    pub fn new(backend: Arc<dyn Storage>, hub: Arc<ChannelHub>) -> Self {
        Self {
            storage: Arc::new(NotifyingStorage::new(backend, hub.clone())),
            hub,
            auth: AuthConfig::default(),
            limits: RateLimitConfig::default(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_limits(mut self, limits: RateLimitConfig) -> Self {
        self.limits = limits;
        self
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn storage(&self) -> &Arc<NotifyingStorage> {
        &self.storage
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn limits(&self) -> &RateLimitConfig {
        &self.limits
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }

    pub(crate) fn record(&self, _event: ServerEvent) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.metrics() {
            match _event {
                ServerEvent::DocumentCreated => m.documents_created.inc(),
                ServerEvent::DocumentDeleted => m.documents_deleted.inc(),
                ServerEvent::ContentWritten => {
                    m.writes_total.inc();
                    m.changes_published.inc();
                }
                ServerEvent::CursorRelayed => m.cursor_frames_relayed.inc(),
                ServerEvent::CursorDropped => m.cursor_frames_dropped.inc(),
                ServerEvent::RateLimited => m.rate_limited_requests.inc(),
                ServerEvent::PresenceChanged => m.presence_members.set(self.hub.stats().presence_count as i64),
            }
        }
    }

    pub(crate) fn record_connection(&self, _transport: &str) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.metrics() {
            m.record_connection(_transport);
        }
    }

    pub(crate) fn record_disconnection(&self, _transport: &str) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.metrics() {
            m.record_disconnection(_transport);
            m.presence_members.set(self.hub.stats().presence_count as i64);
        }
    }

    pub(crate) fn record_bytes(&self, _received: u64, _sent: u64) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.metrics() {
            m.record_bytes(_received, _sent);
        }
    }

    pub(crate) fn record_push(&self) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.metrics() {
            m.push_frames_sent.inc();
        }
    }
}
