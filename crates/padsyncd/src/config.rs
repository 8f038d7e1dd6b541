//! Daemon configuration file
//!
//! Every section is optional; missing keys take their defaults.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! tcp_port = 6380
//! ws_port = 6381
//!
//! [storage]
//! backend = "sqlite"
//! path = "/var/lib/padsync/notepads.db"
//!
//! [auth]
//! admin_secret = "change-me"
//! admin_ttl_secs = 900
//! protected_documents = ["admin-notes"]
//!
//! [limits]
//! commands_per_second = 200
//! cursor_frames_per_second = 90
//!
//! [tls]
//! cert = "/etc/padsync/cert.pem"
//! key = "/etc/padsync/key.pem"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use anyhow::{Context, Result};
use padsync_transport::{AuthConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub auth: AuthConfig,
    pub limits: RateLimitConfig,
    pub tls: Option<TlsSection>,
    pub metrics: MetricsSection,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub tcp_port: u16,
    pub ws_port: u16,
    pub tcp: bool,
    pub websocket: bool,
    /// Presence not refreshed by a cursor frame for this long is dropped
    pub presence_ttl_secs: u64,
    pub gc_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            tcp_port: 6380,
            ws_port: 6381,
            tcp: true,
            websocket: true,
            presence_ttl_secs: 300,
            gc_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: Backend,
    /// SQLite database file
    pub path: Option<PathBuf>,
    /// PostgreSQL connection URL
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsSection {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(DaemonConfig::parse("").unwrap(), DaemonConfig::default());
    }

    #[test]
    fn test_full_file() {
        let config = DaemonConfig::parse(
            r#"
            [server]
            tcp_port = 7000
            websocket = false

            [storage]
            backend = "sqlite"
            path = "/tmp/pads.db"

            [auth]
            admin_secret = "s3cret"
            protected_documents = ["admin-notes"]

            [limits]
            commands_per_second = 10

            [tls]
            cert = "cert.pem"
            key = "key.pem"

            [metrics]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.tcp_port, 7000);
        assert_eq!(config.server.ws_port, 6381);
        assert!(!config.server.websocket);
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/pads.db")));
        assert_eq!(config.auth.admin_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.auth.admin_ttl_secs, 900);
        assert!(config.auth.is_protected("admin-notes"));
        assert_eq!(config.limits.commands_per_second, 10);
        assert_eq!(config.limits.cursor_frames_per_second, 90);
        assert_eq!(config.tls.unwrap().key, PathBuf::from("key.pem"));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9090);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(DaemonConfig::parse("[storage]\nbackend = \"redis\"\n").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"127.0.0.1\"").unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");

        let missing = DaemonConfig::load(Path::new("/nonexistent/padsync.toml")).unwrap_err();
        assert!(missing.to_string().contains("/nonexistent/padsync.toml"));
    }
}
