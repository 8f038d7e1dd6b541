//! WebSocket transport
//!
//! Each text message carries one or more protocol lines; each reply and push
//! frame goes out as its own text message.

use crate::context::ServerContext;
use crate::handler::ConnectionHandler;
use crate::TransportResult;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};

/// WebSocket server
pub struct WebSocketServer {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    client_counter: AtomicU64,
}

impl WebSocketServer {
    pub fn new(ctx: Arc<ServerContext>, addr: SocketAddr) -> Self {
        Self {
            ctx,
            addr,
            client_counter: AtomicU64::new(0),
        }
    }

    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        info!(addr = %listener.local_addr()?, "padsync WebSocket server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_id = format!(
                        "ws-{}-{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let ctx = self.ctx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, client_id.clone(), ctx).await {
                            error!(client = %client_id, error = %e, "WebSocket connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, client_id: String, ctx: Arc<ServerContext>) -> TransportResult<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    info!(client = %client_id, "WebSocket client connected");
    ctx.record_connection("websocket");

    let mut handler = ConnectionHandler::new(client_id.clone(), ctx.clone());
    let mut events = handler.subscribe_events();

    let result: TransportResult<()> = async {
        loop {
            tokio::select! {
                msg = read.next() => {
                    let data = match msg {
                        Some(Ok(Message::Text(text))) => {
                            let mut data = text.into_bytes();
                            if !data.ends_with(b"\n") {
                                data.extend_from_slice(b"\r\n");
                            }
                            data
                        }
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(client = %client_id, "WebSocket client disconnected");
                            return Ok(());
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(client = %client_id, error = %e, "WebSocket read error");
                            return Ok(());
                        }
                    };

                    let mut sent = 0;
                    for response in handler.process(&data).await {
                        let text = String::from_utf8_lossy(&response.encode()).into_owned();
                        sent += text.len();
                        write.send(Message::Text(text)).await?;
                    }
                    ctx.record_bytes(data.len() as u64, sent as u64);

                    if handler.is_closing() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(envelope) => {
                            if let Some(push) = handler.forward(&envelope) {
                                let text = String::from_utf8_lossy(&push.encode()).into_owned();
                                ctx.record_bytes(0, text.len() as u64);
                                write.send(Message::Text(text)).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(client = %client_id, missed = n, "WebSocket client lagged behind channel events");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
    .await;

    handler.cleanup();
    ctx.record_disconnection("websocket");
    result
}
