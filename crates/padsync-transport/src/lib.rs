//! padsync Transport Layer
//!
//! Serves the document store and the change channel over the network:
//! - TCP: Raw TCP connections speaking the line protocol
//! - WebSocket: Browser-compatible transport, one protocol frame per message
//! - TLS: Secure TCP connections (optional feature)
//! - Metrics: Prometheus metrics (optional feature)

pub mod context;
pub mod handler;
pub mod rate_limit;
pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;
#[cfg(feature = "tls")]
pub mod tls;
#[cfg(feature = "metrics")]
pub mod metrics;

pub use context::{AuthConfig, ServerContext};
pub use handler::ConnectionHandler;
pub use rate_limit::{ConnectionLimiter, RateLimitConfig, TokenBucket};
pub use tcp::TcpServer;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
#[cfg(feature = "tls")]
pub use tls::{TlsConfig, TlsError};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};

/// Errors that end a listener or a connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

pub type TransportResult<T> = Result<T, TransportError>;
