//! Network client for a padsync server
//!
//! One TCP connection carries both request/reply traffic and push frames.
//! Requests are written under a lock together with a reply slot, so replies
//! are matched to requests in order; push frames are fanned out on a
//! broadcast channel that [`Subscription`]s read from.
//!
//! `RemoteClient` implements both [`Storage`] and [`ChangeChannel`], so an
//! editing session can run against a remote server exactly as it does
//! against the in-process hub.

use async_trait::async_trait;
use padsync_core::channel::Envelope;
use padsync_core::{
    ChangeChannel, ChannelError, CursorPayload, Document, DocumentId, ParticipantId, PresenceMember, Subscription,
};
use padsync_protocol::{Command, Response, ResponseDecoder};
use padsync_storage::{InsertOutcome, Storage, StorageError, StorageStats};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PUSH_CAPACITY: usize = 1024;

/// Why a request got no usable reply
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{code} {message}")]
    Server { code: String, message: String },

    #[error("Unexpected reply: {0}")]
    Unexpected(String),
}

impl From<RequestError> for StorageError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Server { code, message } => StorageError::Rejected { code, message },
            RequestError::Unexpected(msg) => StorageError::Serialization(msg),
            other => StorageError::Connection(other.to_string()),
        }
    }
}

impl From<RequestError> for ChannelError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Server { code, message } => ChannelError::Rejected { code, message },
            RequestError::Closed => ChannelError::Closed,
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

#[derive(Default)]
struct Waiters {
    closed: bool,
    queue: VecDeque<oneshot::Sender<Response>>,
}

/// Client connection to a padsync server
pub struct RemoteClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    waiters: Arc<Mutex<Waiters>>,
    pushes: broadcast::Sender<Envelope>,
    reader: JoinHandle<()>,
}

impl RemoteClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let waiters = Arc::new(Mutex::new(Waiters::default()));
        let (pushes, _) = broadcast::channel(PUSH_CAPACITY);
        let reader = tokio::spawn(read_loop(read_half, waiters.clone(), pushes.clone()));

        info!(server = %peer, "Connected to padsync server");

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            waiters,
            pushes,
            reader,
        })
    }

    /// Send one command and wait for its reply
    pub async fn request(&self, command: &Command) -> Result<Response, RequestError> {
        self.send_line(&command.encode()).await
    }

    /// Send a raw protocol line (for interactive use) and wait for the reply
    pub async fn raw(&self, line: &str) -> Result<Response, RequestError> {
        let line = line.trim_end();
        if line.is_empty() {
            return Err(RequestError::Unexpected("empty command".into()));
        }
        self.send_line(&format!("{}\r\n", line)).await
    }

    async fn send_line(&self, line: &str) -> Result<Response, RequestError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            {
                let mut waiters = self.waiters.lock();
                if waiters.closed {
                    return Err(RequestError::Closed);
                }
                waiters.queue.push_back(tx);
            }
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                self.waiters.lock().closed = true;
                return Err(e.into());
            }
        }

        rx.await.map_err(|_| RequestError::Closed)
    }

    /// Every push frame received on this connection
    pub fn pushes(&self) -> broadcast::Receiver<Envelope> {
        self.pushes.subscribe()
    }

    pub async fn ping(&self) -> Result<(), RequestError> {
        match self.request(&Command::ping()).await? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Obtain the admin grant
    pub async fn auth(&self, secret: &str) -> Result<(), RequestError> {
        self.request(&Command::auth(secret)).await.and_then(expect_ok)
    }

    /// Document ids matching a pattern (admin)
    pub async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, RequestError> {
        match self.request(&Command::keys(pattern.map(str::to_string))).await? {
            Response::Array(items) => items
                .into_iter()
                .map(|item| item.as_text().ok_or_else(|| unexpected(item)))
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    /// Participants present on a document
    pub async fn who(&self, id: &DocumentId) -> Result<Vec<PresenceMember>, RequestError> {
        let reply = self.request(&Command::who(id.as_str())).await?;
        decode_json(reply)
    }

    pub async fn info(&self) -> Result<serde_json::Value, RequestError> {
        let reply = self.request(&Command::info()).await?;
        decode_json(reply)
    }

    /// Ask the server to close the connection
    pub async fn quit(&self) -> Result<(), RequestError> {
        self.request(&Command::quit()).await.and_then(expect_ok)
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(mut reader: OwnedReadHalf, waiters: Arc<Mutex<Waiters>>, pushes: broadcast::Sender<Envelope>) {
    let mut decoder = ResponseDecoder::new();
    let mut buf = vec![0u8; 8192];

    'conn: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Server closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        };

        if let Err(e) = decoder.feed(&buf[..n]) {
            warn!(error = %e, "Server frame too large, closing");
            break;
        }

        loop {
            match decoder.decode() {
                Ok(Some(Response::Push(event))) => {
                    let _ = pushes.send(Envelope { origin: None, event });
                }
                Ok(Some(reply)) => {
                    let waiter = waiters.lock().queue.pop_front();
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => {
                            warn!(?reply, "Reply with no pending request");
                            break 'conn;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // The frame may have been a reply; later replies would
                    // then pair with the wrong requests
                    warn!(error = %e, "Malformed server frame, closing");
                    break 'conn;
                }
            }
        }
    }

    // Dropping the senders fails every pending request
    let mut waiters = waiters.lock();
    waiters.closed = true;
    waiters.queue.clear();
}

fn unexpected(response: Response) -> RequestError {
    match response {
        Response::Error { code, message } => RequestError::Server { code, message },
        other => RequestError::Unexpected(format!("{:?}", other)),
    }
}

fn expect_ok(response: Response) -> Result<(), RequestError> {
    match response {
        Response::Ok(_) => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    match response {
        Response::Bulk(data) => {
            serde_json::from_slice(&data).map_err(|e| RequestError::Unexpected(format!("invalid JSON: {}", e)))
        }
        other => Err(unexpected(other)),
    }
}

#[async_trait]
impl Storage for RemoteClient {
    async fn read(&self, id: &DocumentId) -> Result<Option<Document>, StorageError> {
        match self.request(&Command::get(id.as_str())).await? {
            Response::Null => Ok(None),
            reply => Ok(Some(decode_json(reply)?)),
        }
    }

    async fn insert_if_absent(&self, id: &DocumentId, content: &str) -> Result<InsertOutcome, StorageError> {
        match self.request(&Command::create(id.as_str(), content)).await? {
            Response::Integer(1) => Ok(InsertOutcome::Inserted(Document::new(id.clone(), content))),
            Response::Integer(_) => Ok(InsertOutcome::AlreadyExists),
            other => Err(unexpected(other).into()),
        }
    }

    async fn update(&self, id: &DocumentId, content: &str) -> Result<Document, StorageError> {
        match self.request(&Command::set(id.as_str(), content)).await? {
            Response::Ok(_) => Ok(Document::new(id.clone(), content)),
            Response::Error { code, .. } if code == "NOT_FOUND" => Err(StorageError::NotFound(id.to_string())),
            other => Err(unexpected(other).into()),
        }
    }

    async fn delete(&self, id: &DocumentId) -> Result<bool, StorageError> {
        match self.request(&Command::delete(id.as_str())).await? {
            Response::Integer(n) => Ok(n > 0),
            other => Err(unexpected(other).into()),
        }
    }

    async fn list(&self, pattern: Option<&str>) -> Result<Vec<Document>, StorageError> {
        let reply = self.request(&Command::list(pattern.map(str::to_string))).await?;
        Ok(decode_json(reply)?)
    }

    async fn exists(&self, id: &DocumentId) -> Result<bool, StorageError> {
        Ok(self.read(id).await?.is_some())
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let info = self.info().await?;
        let field = |name: &str| info.get(name).and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
        Ok(StorageStats {
            document_count: field("documents"),
            total_size_bytes: field("total_size_bytes"),
        })
    }
}

#[async_trait]
impl ChangeChannel for RemoteClient {
    async fn subscribe(&self, id: &DocumentId) -> Result<Subscription, ChannelError> {
        // Listen before asking, so no push slips between the two
        let rx = self.pushes.subscribe();
        self.request(&Command::subscribe(id.as_str())).await.and_then(expect_ok)?;
        Ok(Subscription::new(id.clone(), rx))
    }

    async fn unsubscribe(&self, id: &DocumentId) -> Result<(), ChannelError> {
        Ok(self.request(&Command::unsubscribe(id.as_str())).await.and_then(expect_ok)?)
    }

    async fn publish_cursor(&self, id: &DocumentId, payload: CursorPayload) -> Result<(), ChannelError> {
        Ok(self.request(&Command::cursor(id.as_str(), payload)).await.and_then(expect_ok)?)
    }

    async fn announce(&self, id: &DocumentId, member: PresenceMember) -> Result<(), ChannelError> {
        Ok(self.request(&Command::join(id.as_str(), member)).await.and_then(expect_ok)?)
    }

    async fn leave(&self, id: &DocumentId, participant_id: &ParticipantId) -> Result<(), ChannelError> {
        Ok(self
            .request(&Command::leave(id.as_str(), participant_id.clone()))
            .await
            .and_then(expect_ok)?)
    }
}
