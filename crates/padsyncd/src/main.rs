//! padsync daemon (padsyncd)
//!
//! Serves shared notepads: the document store and the change channel over
//! TCP (optionally TLS) and WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (TCP on 6380, WebSocket on 6381, in-memory)
//! padsyncd
//!
//! # Persist to SQLite
//! padsyncd --db /var/lib/padsync/notepads.db
//!
//! # Gate the admin commands behind a shared secret
//! padsyncd --admin-secret change-me
//!
//! # With TLS
//! padsyncd --tls-cert /path/to/cert.pem --tls-key /path/to/key.pem
//!
//! # With configuration file
//! padsyncd --config /etc/padsync/padsync.toml
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use padsync_core::ChannelHub;
use padsync_storage::{MemoryStorage, Storage};
use padsync_transport::{Metrics, MetricsServer, ServerContext, TcpServer, TlsConfig, WebSocketServer};

use crate::config::{Backend, DaemonConfig, StorageSection, TlsSection};

/// padsync daemon - shared notepad server
#[derive(Parser, Debug)]
#[command(name = "padsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "PADSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on [default: 6380]
    #[arg(long, env = "PADSYNC_TCP_PORT")]
    tcp_port: Option<u16>,

    /// WebSocket port to listen on [default: 6381]
    #[arg(long, env = "PADSYNC_WS_PORT")]
    ws_port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "PADSYNC_BIND")]
    bind: Option<String>,

    /// Log filter (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "PADSYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Disable TCP server
    #[arg(long)]
    no_tcp: bool,

    /// Disable WebSocket server
    #[arg(long)]
    no_ws: bool,

    /// SQLite database path (selects the sqlite backend)
    #[arg(long, env = "PADSYNC_DB", conflicts_with = "database_url")]
    db: Option<PathBuf>,

    /// PostgreSQL URL (selects the postgres backend)
    #[arg(long, env = "PADSYNC_DATABASE_URL")]
    database_url: Option<String>,

    /// Shared secret for admin commands (KEYS, LIST, DEL)
    #[arg(long, env = "PADSYNC_ADMIN_SECRET")]
    admin_secret: Option<String>,

    /// Path to TLS certificate file (PEM format)
    #[arg(long, env = "PADSYNC_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    #[arg(long, env = "PADSYNC_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Max commands per second per client (0 = unlimited)
    #[arg(long, env = "PADSYNC_RATE_LIMIT")]
    rate_limit: Option<u32>,

    /// Command burst size [default: 2x rate limit]
    #[arg(long, env = "PADSYNC_RATE_BURST")]
    rate_burst: Option<u32>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "PADSYNC_METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Args {
    /// Command-line values win over the config file
    fn apply(&self, config: &mut DaemonConfig) {
        let server = &mut config.server;
        if let Some(port) = self.tcp_port {
            server.tcp_port = port;
        }
        if let Some(port) = self.ws_port {
            server.ws_port = port;
        }
        if let Some(bind) = &self.bind {
            server.bind = bind.clone();
        }
        if self.no_tcp {
            server.tcp = false;
        }
        if self.no_ws {
            server.websocket = false;
        }

        if let Some(path) = &self.db {
            config.storage = StorageSection {
                backend: Backend::Sqlite,
                path: Some(path.clone()),
                url: None,
            };
        } else if let Some(url) = &self.database_url {
            config.storage = StorageSection {
                backend: Backend::Postgres,
                path: None,
                url: Some(url.clone()),
            };
        }

        if let Some(secret) = &self.admin_secret {
            config.auth.admin_secret = Some(secret.clone());
        }
        if config.auth.admin_secret.as_deref() == Some("") {
            config.auth.admin_secret = None;
        }

        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            config.tls = Some(TlsSection {
                cert: cert.clone(),
                key: key.clone(),
            });
        }

        if let Some(rate) = self.rate_limit {
            config.limits.commands_per_second = rate;
            config.limits.command_burst = self.rate_burst.unwrap_or(rate.saturating_mul(2));
        } else if let Some(burst) = self.rate_burst {
            config.limits.command_burst = burst;
        }

        if let Some(port) = self.metrics_port {
            config.metrics.enabled = true;
            config.metrics.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    args.apply(&mut config);

    print_banner();

    let backend = open_storage(&config.storage).await?;
    let hub = Arc::new(ChannelHub::new());

    let mut ctx = ServerContext::new(backend, hub.clone())
        .with_auth(config.auth.clone())
        .with_limits(config.limits.clone());

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
        ctx = ctx.with_metrics(metrics.clone());
        Some(metrics)
    } else {
        None
    };
    let ctx = Arc::new(ctx);

    let tls_config = match &config.tls {
        Some(tls) => {
            info!(cert = %tls.cert.display(), key = %tls.key.display(), "Loading TLS certificates");
            let loaded = TlsConfig::from_pem(&tls.cert, &tls.key).context("Failed to load TLS certificates")?;
            info!("TLS enabled");
            Some(loaded)
        }
        None => None,
    };

    let server = &config.server;
    info!(
        tcp_port = server.tcp_port,
        ws_port = server.ws_port,
        bind = %server.bind,
        tls = tls_config.is_some(),
        commands_per_second = config.limits.commands_per_second,
        "Starting padsync daemon"
    );

    if config.auth.admin_secret.is_some() {
        info!(
            protected = config.auth.protected_documents.len(),
            ttl_secs = config.auth.admin_ttl_secs,
            "Admin authentication enabled"
        );
    }

    let mut handles = Vec::new();

    if server.tcp {
        let tcp_addr: SocketAddr = format!("{}:{}", server.bind, server.tcp_port).parse()?;
        let mut tcp_server = TcpServer::new(ctx.clone(), tcp_addr);
        if let Some(tls) = &tls_config {
            tcp_server = tcp_server.with_tls(tls.clone());
        }
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp_server.run().await {
                error!(error = %e, "TCP server error");
            }
        }));
    }

    if server.websocket {
        let ws_addr: SocketAddr = format!("{}:{}", server.bind, server.ws_port).parse()?;
        let ws_server = WebSocketServer::new(ctx.clone(), ws_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                error!(error = %e, "WebSocket server error");
            }
        }));
    }

    if handles.is_empty() {
        anyhow::bail!("At least one transport must be enabled");
    }

    if let Some(metrics) = metrics {
        let metrics_addr: SocketAddr = format!("{}:{}", server.bind, config.metrics.port).parse()?;
        let metrics_server = MetricsServer::new(metrics, metrics_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                error!(error = %e, "Metrics server error");
            }
        }));
    }

    // Presence whose connection vanished without a clean close
    let gc_hub = hub.clone();
    let presence_ttl_ms = server.presence_ttl_secs.saturating_mul(1000);
    let gc_interval = Duration::from_secs(server.gc_interval_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(gc_interval);
        loop {
            interval.tick().await;
            let removed = gc_hub.sweep_stale(presence_ttl_ms);
            if removed > 0 {
                info!(removed = removed, "GC: removed idle presence");
            }
        }
    }));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}

async fn open_storage(section: &StorageSection) -> Result<Arc<dyn Storage>> {
    match section.backend {
        Backend::Memory => {
            info!("Running in-memory only (no persistence configured)");
            Ok(Arc::new(MemoryStorage::new()))
        }
        Backend::Sqlite => open_sqlite(section),
        Backend::Postgres => open_postgres(section).await,
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(section: &StorageSection) -> Result<Arc<dyn Storage>> {
    let path = section
        .path
        .as_ref()
        .context("storage.path is required for the sqlite backend")?;
    info!(path = %path.display(), "Initializing SQLite persistence");
    let storage = padsync_storage::SqliteStorage::new(path)
        .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_section: &StorageSection) -> Result<Arc<dyn Storage>> {
    anyhow::bail!("padsyncd was built without SQLite support")
}

#[cfg(feature = "postgres")]
async fn open_postgres(section: &StorageSection) -> Result<Arc<dyn Storage>> {
    let url = section
        .url
        .as_deref()
        .context("storage.url is required for the postgres backend")?;
    info!("Connecting to PostgreSQL");
    let storage = padsync_storage::PostgresStorage::new(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_section: &StorageSection) -> Result<Arc<dyn Storage>> {
    anyhow::bail!("padsyncd was built without PostgreSQL support (enable the `postgres` feature)")
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┌─┐┌┬┐┌─┐┬ ┬┌┐┌┌─┐
  ├─┘├─┤ ││└─┐└┬┘││││
  ┴  ┴ ┴─┴┘└─┘ ┴ ┘└┘└─┘
  Shared notepad server
  Version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let mut config = DaemonConfig::parse(
            r#"
            [server]
            tcp_port = 7000
            ws_port = 7001

            [auth]
            admin_secret = "from-file"
            "#,
        )
        .unwrap();

        let args = Args::parse_from([
            "padsyncd",
            "--tcp-port",
            "8000",
            "--db",
            "/tmp/pads.db",
            "--admin-secret",
            "from-cli",
            "--rate-limit",
            "50",
            "--no-ws",
        ]);
        args.apply(&mut config);

        assert_eq!(config.server.tcp_port, 8000);
        assert_eq!(config.server.ws_port, 7001);
        assert!(!config.server.websocket);
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.auth.admin_secret.as_deref(), Some("from-cli"));
        assert_eq!(config.limits.commands_per_second, 50);
        assert_eq!(config.limits.command_burst, 100);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_empty_secret_disables_gate() {
        let mut config = DaemonConfig::default();
        Args::parse_from(["padsyncd", "--admin-secret", ""]).apply(&mut config);
        assert_eq!(config.auth.admin_secret, None);
    }

    #[test]
    fn test_metrics_port_enables_metrics() {
        let mut config = DaemonConfig::default();
        Args::parse_from(["padsyncd", "--metrics-port", "9100"]).apply(&mut config);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[tokio::test]
    async fn test_sqlite_backend_needs_path() {
        let section = StorageSection {
            backend: Backend::Sqlite,
            path: None,
            url: None,
        };
        assert!(open_storage(&section).await.is_err());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_open_sqlite_storage() {
        let dir = tempfile::tempdir().unwrap();
        let section = StorageSection {
            backend: Backend::Sqlite,
            path: Some(dir.path().join("pads.db")),
            url: None,
        };
        let storage = open_storage(&section).await.unwrap();
        assert_eq!(storage.stats().await.unwrap().document_count, 0);
    }
}
