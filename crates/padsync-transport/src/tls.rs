//! TLS for the TCP listener, using rustls

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Server-side TLS settings
#[derive(Clone)]
pub struct TlsConfig {
    acceptor: TlsAcceptor,
}

impl TlsConfig {
    /// Build from a PEM certificate chain and a PEM private key
    /// (PKCS#1, PKCS#8 or SEC1)
    pub fn from_pem(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let certs = load_certs(cert_path.as_ref())?;
        let key = load_private_key(key_path.as_ref())?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Config(e.to_string()))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

fn open(path: &Path) -> Result<BufReader<File>, String> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path).map_err(TlsError::CertLoad)?;

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertLoad(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(TlsError::CertLoad(format!("No certificates found in {}", path.display())));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path).map_err(TlsError::KeyLoad)?;

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::KeyLoad(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| TlsError::KeyLoad(format!("No private key found in {}", path.display())))
}

/// TLS-related errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to load certificate: {0}")]
    CertLoad(String),

    #[error("Failed to load private key: {0}")]
    KeyLoad(String),

    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("TLS handshake failed: {0}")]
    Handshake(String),
}
