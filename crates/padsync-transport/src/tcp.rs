//! TCP transport

use crate::context::ServerContext;
use crate::handler::ConnectionHandler;
use crate::TransportResult;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[cfg(feature = "tls")]
use crate::tls::TlsConfig;

/// TCP server speaking the line protocol
pub struct TcpServer {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    client_counter: AtomicU64,
    #[cfg(feature = "tls")]
    tls: Option<TlsConfig>,
}

impl TcpServer {
    pub fn new(ctx: Arc<ServerContext>, addr: SocketAddr) -> Self {
        Self {
            ctx,
            addr,
            client_counter: AtomicU64::new(0),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Require TLS on every accepted connection
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> TransportResult<()> {
        info!(addr = %listener.local_addr()?, "padsync TCP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client_id = format!(
                        "tcp-{}-{}",
                        peer_addr,
                        self.client_counter.fetch_add(1, Ordering::Relaxed)
                    );
                    let ctx = self.ctx.clone();

                    #[cfg(feature = "tls")]
                    if let Some(tls) = &self.tls {
                        let acceptor = tls.acceptor().clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    if let Err(e) = handle_connection(tls_stream, client_id.clone(), ctx, "tls").await {
                                        error!(client = %client_id, error = %e, "Connection error");
                                    }
                                }
                                Err(e) => warn!(client = %client_id, error = %e, "TLS handshake failed"),
                            }
                        });
                        continue;
                    }

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, client_id.clone(), ctx, "tcp").await {
                            error!(client = %client_id, error = %e, "Connection error");
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

/// Serve one client over any byte stream until it quits or disconnects
pub async fn handle_connection<S>(
    mut stream: S,
    client_id: String,
    ctx: Arc<ServerContext>,
    transport: &'static str,
) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(client = %client_id, "Client connected");
    ctx.record_connection(transport);

    let mut handler = ConnectionHandler::new(client_id.clone(), ctx.clone());
    let mut events = handler.subscribe_events();
    let mut buf = vec![0u8; 4096];

    let result: TransportResult<()> = async {
        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => {
                            info!(client = %client_id, "Client disconnected");
                            return Ok(());
                        }
                        Ok(n) => n,
                        Err(e) => {
                            warn!(client = %client_id, error = %e, "Read error");
                            return Ok(());
                        }
                    };

                    let mut sent = 0;
                    for response in handler.process(&buf[..n]).await {
                        let data = response.encode();
                        sent += data.len();
                        stream.write_all(&data).await?;
                    }
                    ctx.record_bytes(n as u64, sent as u64);

                    if handler.is_closing() {
                        stream.flush().await?;
                        return Ok(());
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(envelope) => {
                            if let Some(push) = handler.forward(&envelope) {
                                let data = push.encode();
                                stream.write_all(&data).await?;
                                ctx.record_bytes(0, data.len() as u64);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(client = %client_id, missed = n, "Client lagged behind channel events");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
            }
        }
    }
    .await;

    handler.cleanup();
    ctx.record_disconnection(transport);
    result
}
