//! Connection handler - runs commands and filters channel events for one client

use crate::context::{ServerContext, ServerEvent};
use crate::rate_limit::ConnectionLimiter;
use padsync_core::channel::Envelope;
use padsync_core::{CursorPayload, DocumentId, ParticipantId, PresenceMember};
use padsync_protocol::{Command, CommandKind, Parser, Response};
use padsync_storage::{InsertOutcome, Storage, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Handles a single client connection
pub struct ConnectionHandler {
    /// Unique client ID, also the origin tag of this client's broadcasts
    pub client_id: String,
    ctx: Arc<ServerContext>,
    parser: Parser,
    /// Documents this client receives push frames for
    subscriptions: HashSet<DocumentId>,
    /// Admin grant expiry, set by a successful AUTH
    admin_until: Option<Instant>,
    limiter: ConnectionLimiter,
    closing: bool,
}

impl ConnectionHandler {
    pub fn new(client_id: impl Into<String>, ctx: Arc<ServerContext>) -> Self {
        let limiter = ConnectionLimiter::new(ctx.limits());
        Self {
            client_id: client_id.into(),
            ctx,
            parser: Parser::new(),
            subscriptions: HashSet::new(),
            admin_until: None,
            limiter,
            closing: false,
        }
    }

    /// Process incoming bytes and return the replies, in command order
    pub async fn process(&mut self, data: &[u8]) -> Vec<Response> {
        let mut responses = Vec::new();

        if let Err(e) = self.parser.feed(data) {
            responses.push(Response::error("PARSE_ERROR", e.to_string()));
            return responses;
        }

        while !self.closing {
            match self.parser.parse() {
                Ok(Some(cmd)) => {
                    let response = self.handle_command(cmd).await;
                    responses.push(response);
                }
                Ok(None) => break,
                Err(e) => responses.push(Response::error("PARSE_ERROR", e.to_string())),
            }
        }

        responses
    }

    /// Whether the client asked to close the connection
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Handle a single command
    pub async fn handle_command(&mut self, cmd: Command) -> Response {
        debug!(client = %self.client_id, cmd = cmd.kind.name(), "Processing command");

        let started = Instant::now();
        let name = cmd.kind.name();
        let response = self.dispatch(cmd).await;
        self.observe(name, started, &response);
        response
    }

    async fn dispatch(&mut self, cmd: Command) -> Response {
        // AUTH, PING and QUIT bypass the gate and the limiter
        match &cmd.kind {
            CommandKind::Auth { secret } => return self.handle_auth(secret),
            CommandKind::Ping => return Response::pong(),
            CommandKind::Quit => {
                self.closing = true;
                return Response::ok_with_message("Goodbye");
            }
            _ => {}
        }

        if !matches!(cmd.kind, CommandKind::Cursor { .. }) && !self.limiter.admit_command() {
            self.ctx.record(ServerEvent::RateLimited);
            return Response::error("RATE_LIMITED", "Too many commands, slow down");
        }

        if self.requires_admin(&cmd) && !self.admin_granted() {
            return Response::error("NOAUTH", "Admin authentication required. Use AUTH <secret>");
        }

        match cmd.kind {
            CommandKind::Get => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_get(id).await,
                Err(resp) => resp,
            },
            CommandKind::Create { content } => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_create(id, content).await,
                Err(resp) => resp,
            },
            CommandKind::Set { content } => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_set(id, content).await,
                Err(resp) => resp,
            },
            CommandKind::Delete => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_delete(id).await,
                Err(resp) => resp,
            },
            CommandKind::Keys { pattern } => self.handle_keys(pattern).await,
            CommandKind::List { pattern } => self.handle_list(pattern).await,
            CommandKind::Subscribe => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_subscribe(id),
                Err(resp) => resp,
            },
            CommandKind::Unsubscribe => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_unsubscribe(id),
                Err(resp) => resp,
            },
            CommandKind::Join { member } => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_join(id, member),
                Err(resp) => resp,
            },
            CommandKind::Cursor { payload } => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_cursor(id, payload),
                Err(resp) => resp,
            },
            CommandKind::Leave { participant_id } => match parse_id(cmd.document_id) {
                Ok(id) => self.handle_leave(id, participant_id),
                Err(resp) => resp,
            },
            CommandKind::Who => match parse_id(cmd.document_id) {
                Ok(id) => Response::json(&self.ctx.hub().members(&id)),
                Err(resp) => resp,
            },
            CommandKind::Info => self.handle_info().await,
            CommandKind::Auth { .. } | CommandKind::Ping | CommandKind::Quit => Response::ok(),
        }
    }

    fn requires_admin(&self, cmd: &Command) -> bool {
        let auth = self.ctx.auth();
        if auth.admin_secret.is_none() {
            return false;
        }

        cmd.kind.is_admin_only()
            || cmd
                .document_id
                .as_deref()
                .map_or(false, |id| auth.is_protected(id))
    }

    fn admin_granted(&self) -> bool {
        match self.ctx.auth().admin_secret {
            None => true,
            Some(_) => self.admin_until.map_or(false, |until| Instant::now() < until),
        }
    }

    fn handle_auth(&mut self, secret: &str) -> Response {
        match &self.ctx.auth().admin_secret {
            Some(expected) if expected == secret => {
                self.admin_until = Some(Instant::now() + self.ctx.auth().admin_ttl());
                info!(client = %self.client_id, "Admin access granted");
                Response::ok()
            }
            Some(_) => {
                self.admin_until = None;
                warn!(client = %self.client_id, "Admin authentication failed");
                Response::error("WRONGPASS", "Invalid secret")
            }
            None => Response::ok_with_message("No authentication required"),
        }
    }

    async fn handle_get(&self, id: DocumentId) -> Response {
        match self.ctx.storage().read(&id).await {
            Ok(Some(doc)) => Response::json(&doc),
            Ok(None) => Response::null(),
            Err(e) => storage_error(&id, e),
        }
    }

    async fn handle_create(&self, id: DocumentId, content: String) -> Response {
        match self.ctx.storage().insert_if_absent(&id, &content).await {
            Ok(InsertOutcome::Inserted(_)) => {
                info!(client = %self.client_id, doc_id = %id, "Notepad created");
                self.ctx.record(ServerEvent::DocumentCreated);
                Response::integer(1)
            }
            Ok(InsertOutcome::AlreadyExists) => Response::integer(0),
            Err(e) => storage_error(&id, e),
        }
    }

    async fn handle_set(&self, id: DocumentId, content: String) -> Response {
        match self.ctx.storage().update(&id, &content).await {
            Ok(doc) => {
                debug!(client = %self.client_id, doc_id = %id, size = doc.content.len(), "Content written");
                self.ctx.record(ServerEvent::ContentWritten);
                Response::ok()
            }
            Err(e) => storage_error(&id, e),
        }
    }

    async fn handle_delete(&self, id: DocumentId) -> Response {
        match self.ctx.storage().delete(&id).await {
            Ok(true) => {
                info!(client = %self.client_id, doc_id = %id, "Notepad deleted");
                self.ctx.record(ServerEvent::DocumentDeleted);
                Response::integer(1)
            }
            Ok(false) => Response::integer(0),
            Err(e) => storage_error(&id, e),
        }
    }

    async fn handle_keys(&self, pattern: Option<String>) -> Response {
        match self.ctx.storage().list(pattern.as_deref()).await {
            Ok(docs) => Response::array(
                docs.into_iter()
                    .map(|doc| Response::bulk(doc.id.as_str().as_bytes().to_vec()))
                    .collect(),
            ),
            Err(e) => Response::error("STORAGE_ERROR", e.to_string()),
        }
    }

    async fn handle_list(&self, pattern: Option<String>) -> Response {
        match self.ctx.storage().list(pattern.as_deref()).await {
            Ok(docs) => Response::json(&docs),
            Err(e) => Response::error("STORAGE_ERROR", e.to_string()),
        }
    }

    fn handle_subscribe(&mut self, id: DocumentId) -> Response {
        let msg = format!("Subscribed to {}", id);
        self.subscriptions.insert(id);
        Response::ok_with_message(msg)
    }

    fn handle_unsubscribe(&mut self, id: DocumentId) -> Response {
        let msg = format!("Unsubscribed from {}", id);
        self.subscriptions.remove(&id);
        Response::ok_with_message(msg)
    }

    fn handle_join(&self, id: DocumentId, member: PresenceMember) -> Response {
        debug!(client = %self.client_id, doc_id = %id, participant = %member.participant_id, "Participant joined");
        self.ctx.hub().set_presence(&self.client_id, &id, member);
        self.ctx.record(ServerEvent::PresenceChanged);
        Response::ok()
    }

    fn handle_cursor(&mut self, id: DocumentId, payload: CursorPayload) -> Response {
        if self.limiter.admit_cursor() {
            self.ctx.hub().publish_cursor_from(&self.client_id, &id, payload);
            self.ctx.record(ServerEvent::CursorRelayed);
        } else {
            trace!(client = %self.client_id, doc_id = %id, "Cursor frame dropped");
            self.ctx.record(ServerEvent::CursorDropped);
        }
        Response::ok()
    }

    fn handle_leave(&self, id: DocumentId, participant_id: ParticipantId) -> Response {
        if self.ctx.hub().remove_presence(&self.client_id, &id, &participant_id) {
            self.ctx.record(ServerEvent::PresenceChanged);
        }
        Response::ok()
    }

    async fn handle_info(&self) -> Response {
        let stats = self.ctx.storage().stats().await.unwrap_or_default();
        let hub = self.ctx.hub().stats();
        let mut subscriptions: Vec<&str> = self.subscriptions.iter().map(DocumentId::as_str).collect();
        subscriptions.sort_unstable();

        Response::json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "documents": stats.document_count,
            "total_size_bytes": stats.total_size_bytes,
            "subscribers": hub.subscriber_count,
            "presence": hub.presence_count,
            "client_id": self.client_id,
            "subscriptions": subscriptions,
            "admin": self.ctx.auth().admin_secret.is_some() && self.admin_granted(),
        }))
    }

    fn observe(&self, _name: &str, _started: Instant, _response: &Response) {
        #[cfg(feature = "metrics")]
        if let Some(m) = self.ctx.metrics() {
            m.record_command(_name, _started.elapsed().as_secs_f64());
            if let Response::Error { code, .. } = _response {
                m.record_error(_name, code);
            }
        }
    }

    /// Receiver for every channel event; filter with [`ConnectionHandler::forward`]
    pub fn subscribe_events(&self) -> broadcast::Receiver<Envelope> {
        self.ctx.hub().subscribe_all()
    }

    /// Turn a channel event into a push frame if this client should see it.
    ///
    /// Change notifications go to every subscriber, the writer included.
    /// Cursor and presence events are not echoed to the connection that sent them.
    pub fn forward(&self, envelope: &Envelope) -> Option<Response> {
        let event = &envelope.event;

        if !self.subscriptions.contains(event.document_id()) {
            return None;
        }

        if event.is_ephemeral() && envelope.origin.as_deref() == Some(self.client_id.as_str()) {
            return None;
        }

        self.ctx.record_push();
        Some(Response::push(event.clone()))
    }

    /// Clean up when the connection closes: leave every document this client joined
    pub fn cleanup(&mut self) {
        let left = self.ctx.hub().remove_client(&self.client_id);
        if left > 0 {
            debug!(client = %self.client_id, count = left, "Presence removed on disconnect");
            self.ctx.record(ServerEvent::PresenceChanged);
        }
        self.subscriptions.clear();
    }
}

fn parse_id(raw: Option<String>) -> Result<DocumentId, Response> {
    let raw = raw.ok_or_else(|| Response::error("MISSING_ARG", "Document ID required"))?;
    DocumentId::new(raw).map_err(|e| Response::error("INVALID_ID", e.to_string()))
}

fn storage_error(id: &DocumentId, e: StorageError) -> Response {
    match e {
        StorageError::NotFound(_) => Response::not_found(id.as_str()),
        other => {
            warn!(doc_id = %id, error = %other, "Storage operation failed");
            Response::error("STORAGE_ERROR", other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthConfig;
    use crate::rate_limit::RateLimitConfig;
    use padsync_core::{ChannelEvent, ChannelHub, Participant};
    use padsync_storage::MemoryStorage;
    use std::time::Duration;

    fn context() -> ServerContext {
        ServerContext::new(Arc::new(MemoryStorage::new()), Arc::new(ChannelHub::new()))
    }

    fn handler(ctx: &Arc<ServerContext>, name: &str) -> ConnectionHandler {
        ConnectionHandler::new(name, ctx.clone())
    }

    async fn run(handler: &mut ConnectionHandler, line: &str) -> Response {
        let mut out = handler.process(format!("{}\r\n", line).as_bytes()).await;
        assert_eq!(out.len(), 1, "expected one reply to {:?}", line);
        out.remove(0)
    }

    fn drain(handler: &ConnectionHandler, rx: &mut broadcast::Receiver<Envelope>) -> Vec<ChannelEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            if let Some(Response::Push(event)) = handler.forward(&envelope) {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_create_get_set() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        assert_eq!(run(&mut h, "GET abc123").await, Response::null());
        assert_eq!(run(&mut h, "CREATE abc123").await, Response::integer(1));
        assert_eq!(run(&mut h, "CREATE abc123").await, Response::integer(0));
        assert_eq!(run(&mut h, "SET abc123 \"Hello\"").await, Response::ok());

        let text = run(&mut h, "GET abc123").await.as_text().unwrap();
        let doc: padsync_core::Document = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.content, "Hello");
    }

    #[tokio::test]
    async fn test_set_missing_document() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        let resp = run(&mut h, "SET ghost \"boo\"").await;
        assert!(matches!(resp, Response::Error { ref code, .. } if code == "NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_invalid_document_id() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        let resp = run(&mut h, "GET bad/id").await;
        assert!(matches!(resp, Response::Error { ref code, .. } if code == "INVALID_ID"));
    }

    #[tokio::test]
    async fn test_change_is_pushed_to_writer_and_peers() {
        let ctx = Arc::new(context());
        let mut writer = handler(&ctx, "c1");
        let mut peer = handler(&ctx, "c2");
        let mut writer_rx = writer.subscribe_events();
        let mut peer_rx = peer.subscribe_events();

        run(&mut writer, "CREATE abc123").await;
        run(&mut writer, "SUB abc123").await;
        run(&mut peer, "SUB abc123").await;
        run(&mut writer, "SET abc123 \"Hello\"").await;

        let expected = ChannelEvent::Change {
            document_id: DocumentId::new("abc123").unwrap(),
            content: "Hello".into(),
        };
        assert_eq!(drain(&writer, &mut writer_rx), vec![expected.clone()]);
        assert_eq!(drain(&peer, &mut peer_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_unsubscribed_documents_are_filtered() {
        let ctx = Arc::new(context());
        let mut a = handler(&ctx, "c1");
        let mut rx = a.subscribe_events();

        run(&mut a, "CREATE other").await;
        run(&mut a, "SUB abc123").await;
        run(&mut a, "SET other \"x\"").await;
        assert!(drain(&a, &mut rx).is_empty());

        run(&mut a, "UNSUB abc123").await;
        assert!(a.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_cursor_not_echoed_to_sender() {
        let ctx = Arc::new(context());
        let mut a = handler(&ctx, "c1");
        let mut b = handler(&ctx, "c2");
        let mut a_rx = a.subscribe_events();
        let mut b_rx = b.subscribe_events();
        run(&mut a, "SUB abc123").await;
        run(&mut b, "SUB abc123").await;

        let me = Participant::random();
        let line = Command::cursor("abc123", me.cursor_at(10.0, 20.0)).encode();
        assert_eq!(run(&mut a, line.trim_end()).await, Response::ok());

        assert!(drain(&a, &mut a_rx).is_empty());
        let seen = drain(&b, &mut b_rx);
        assert!(matches!(&seen[..], [ChannelEvent::Cursor { payload, .. }] if payload.x == 10.0));
    }

    #[tokio::test]
    async fn test_join_who_and_cleanup() {
        let ctx = Arc::new(context());
        let mut a = handler(&ctx, "c1");
        let mut b = handler(&ctx, "c2");
        let mut b_rx = b.subscribe_events();
        run(&mut b, "SUB abc123").await;

        let me = Participant::random();
        let line = Command::join("abc123", me.member()).encode();
        run(&mut a, line.trim_end()).await;

        let who = run(&mut b, "WHO abc123").await.as_text().unwrap();
        let members: Vec<PresenceMember> = serde_json::from_str(&who).unwrap();
        assert_eq!(members, vec![me.member()]);

        a.cleanup();
        let seen = drain(&b, &mut b_rx);
        assert!(matches!(seen.last(), Some(ChannelEvent::Leave { participant_id, .. }) if participant_id == &me.id));
        assert!(ctx.hub().members(&DocumentId::new("abc123").unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_no_secret_means_no_gate() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        assert_eq!(
            run(&mut h, "AUTH anything").await,
            Response::ok_with_message("No authentication required")
        );
        assert!(matches!(run(&mut h, "KEYS").await, Response::Array(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_gate_and_expiry() {
        let ctx = Arc::new(context().with_auth(AuthConfig::with_secret("s3cret")));
        let mut h = handler(&ctx, "c1");

        let noauth = |r: &Response| matches!(r, Response::Error { code, .. } if code == "NOAUTH");

        assert!(noauth(&run(&mut h, "KEYS").await));
        assert!(noauth(&run(&mut h, "LIST").await));
        assert!(noauth(&run(&mut h, "DEL abc123").await));
        // Regular editing stays open
        assert_eq!(run(&mut h, "CREATE abc123").await, Response::integer(1));

        let wrong = run(&mut h, "AUTH nope").await;
        assert!(matches!(wrong, Response::Error { ref code, .. } if code == "WRONGPASS"));

        assert_eq!(run(&mut h, "AUTH s3cret").await, Response::ok());
        assert!(matches!(run(&mut h, "KEYS").await, Response::Array(ref ids) if ids.len() == 1));

        tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
        assert!(noauth(&run(&mut h, "KEYS").await));
    }

    #[tokio::test]
    async fn test_protected_documents_need_admin() {
        let mut auth = AuthConfig::with_secret("s3cret");
        auth.protected_documents.insert("admin-notes".into());
        let ctx = Arc::new(context().with_auth(auth));
        let mut h = handler(&ctx, "c1");

        let resp = run(&mut h, "GET admin-notes").await;
        assert!(matches!(resp, Response::Error { ref code, .. } if code == "NOAUTH"));
        assert_eq!(run(&mut h, "GET public").await, Response::null());

        run(&mut h, "AUTH s3cret").await;
        assert_eq!(run(&mut h, "GET admin-notes").await, Response::null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_lane_rejects_cursor_lane_drops() {
        let limits = RateLimitConfig {
            commands_per_second: 1,
            command_burst: 1,
            cursor_frames_per_second: 1,
            cursor_burst: 1,
        };
        let ctx = Arc::new(context().with_limits(limits));
        let mut a = handler(&ctx, "c1");
        let mut b = handler(&ctx, "c2");
        let mut b_rx = b.subscribe_events();

        assert!(!run(&mut b, "SUB abc123").await.is_error());

        assert_eq!(run(&mut a, "GET abc123").await, Response::null());
        let limited = run(&mut a, "GET abc123").await;
        assert!(matches!(limited, Response::Error { ref code, .. } if code == "RATE_LIMITED"));

        let me = Participant::random();
        for x in 0..3 {
            let line = Command::cursor("abc123", me.cursor_at(x as f64, 0.0)).encode();
            assert_eq!(run(&mut a, line.trim_end()).await, Response::ok());
        }
        assert_eq!(drain(&b, &mut b_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_quit_stops_processing() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        let out = h.process(b"PING\r\nQUIT\r\nPING\r\n").await;
        assert_eq!(out, vec![Response::pong(), Response::ok_with_message("Goodbye")]);
        assert!(h.is_closing());
    }

    #[tokio::test]
    async fn test_parse_error_reply() {
        let ctx = Arc::new(context());
        let mut h = handler(&ctx, "c1");

        let resp = run(&mut h, "FROB").await;
        assert!(matches!(resp, Response::Error { ref code, .. } if code == "PARSE_ERROR"));
    }
}
