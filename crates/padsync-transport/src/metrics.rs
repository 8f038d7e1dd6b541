//! Prometheus metrics for padsync servers
//!
//! Exposed in Prometheus text format over a minimal HTTP endpoint.

use crate::TransportResult;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info};

/// padsync metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub connections_total: IntCounterVec,
    pub connections_active: IntGaugeVec,

    pub commands_total: IntCounterVec,
    pub commands_errors: IntCounterVec,
    pub command_duration_seconds: HistogramVec,

    pub documents_created: IntCounter,
    pub documents_deleted: IntCounter,
    pub writes_total: IntCounter,
    pub changes_published: IntCounter,

    pub push_frames_sent: IntCounter,
    pub cursor_frames_relayed: IntCounter,
    pub cursor_frames_dropped: IntCounter,
    pub presence_members: IntGauge,

    pub bytes_received: IntCounter,
    pub bytes_sent: IntCounter,

    pub rate_limited_requests: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("padsync_connections_total", "Total number of connections"),
            &["transport"],
        )?;
        let connections_active = IntGaugeVec::new(
            Opts::new("padsync_connections_active", "Number of active connections"),
            &["transport"],
        )?;

        let commands_total = IntCounterVec::new(
            Opts::new("padsync_commands_total", "Total number of commands processed"),
            &["command"],
        )?;
        let commands_errors = IntCounterVec::new(
            Opts::new("padsync_commands_errors_total", "Total number of command errors"),
            &["command", "error_type"],
        )?;
        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new("padsync_command_duration_seconds", "Command processing duration")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;

        let documents_created = IntCounter::new("padsync_documents_created_total", "Notepads created")?;
        let documents_deleted = IntCounter::new("padsync_documents_deleted_total", "Notepads deleted")?;
        let writes_total = IntCounter::new("padsync_writes_total", "Committed content writes")?;
        let changes_published = IntCounter::new(
            "padsync_changes_published_total",
            "Change notifications published to the channel",
        )?;

        let push_frames_sent = IntCounter::new("padsync_push_frames_sent_total", "Push frames delivered to clients")?;
        let cursor_frames_relayed = IntCounter::new("padsync_cursor_frames_relayed_total", "Cursor frames relayed")?;
        let cursor_frames_dropped = IntCounter::new(
            "padsync_cursor_frames_dropped_total",
            "Cursor frames dropped by the per-connection limiter",
        )?;
        let presence_members = IntGauge::new("padsync_presence_members", "Participants currently present")?;

        let bytes_received = IntCounter::new("padsync_bytes_received_total", "Total bytes received from clients")?;
        let bytes_sent = IntCounter::new("padsync_bytes_sent_total", "Total bytes sent to clients")?;

        let rate_limited_requests = IntCounter::new(
            "padsync_rate_limited_requests_total",
            "Commands rejected due to rate limiting",
        )?;

        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(connections_total.clone()),
            Box::new(connections_active.clone()),
            Box::new(commands_total.clone()),
            Box::new(commands_errors.clone()),
            Box::new(command_duration_seconds.clone()),
            Box::new(documents_created.clone()),
            Box::new(documents_deleted.clone()),
            Box::new(writes_total.clone()),
            Box::new(changes_published.clone()),
            Box::new(push_frames_sent.clone()),
            Box::new(cursor_frames_relayed.clone()),
            Box::new(cursor_frames_dropped.clone()),
            Box::new(presence_members.clone()),
            Box::new(bytes_received.clone()),
            Box::new(bytes_sent.clone()),
            Box::new(rate_limited_requests.clone()),
        ];
        for collector in collectors {
            registry.register(collector)?;
        }

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            commands_total,
            commands_errors,
            command_duration_seconds,
            documents_created,
            documents_deleted,
            writes_total,
            changes_published,
            push_frames_sent,
            cursor_frames_relayed,
            cursor_frames_dropped,
            presence_members,
            bytes_received,
            bytes_sent,
            rate_limited_requests,
        })
    }

    pub fn record_connection(&self, transport: &str) {
        self.connections_total.with_label_values(&[transport]).inc();
        self.connections_active.with_label_values(&[transport]).inc();
    }

    pub fn record_disconnection(&self, transport: &str) {
        self.connections_active.with_label_values(&[transport]).dec();
    }

    pub fn record_command(&self, command: &str, duration_secs: f64) {
        self.commands_total.with_label_values(&[command]).inc();
        self.command_duration_seconds
            .with_label_values(&[command])
            .observe(duration_secs);
    }

    pub fn record_error(&self, command: &str, error_type: &str) {
        self.commands_errors.with_label_values(&[command, error_type]).inc();
    }

    pub fn record_bytes(&self, received: u64, sent: u64) {
        self.bytes_received.inc_by(received);
        self.bytes_sent.inc_by(sent);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// HTTP server for the metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    pub async fn run(&self) -> TransportResult<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Metrics server listening on http://{}/metrics", self.addr);

        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let n = match stream.read(&mut buf).await {
                            Ok(n) if n > 0 => n,
                            _ => return,
                        };
                        let response = route(&metrics, &String::from_utf8_lossy(&buf[..n]));
                        let _ = stream.write_all(response.as_bytes()).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

fn route(metrics: &Metrics, request: &str) -> String {
    if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
        let body = metrics.export();
        format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            body.len(),
            body
        )
    } else if request.starts_with("GET /health") {
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK".to_string()
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
    }
}
