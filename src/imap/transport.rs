//! Byte transports an IMAP session runs over.
//!
//! Production uses implicit TLS on port 993. Tests plug in in-memory duplex
//! streams through the same trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::error::SessionError;

/// Opens the stream a session talks IMAP over.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(&self, host: &str, port: u16) -> Result<Self::Stream, SessionError>;
}

/// TCP + rustls client, trusting the webpki root set.
#[derive(Clone)]
pub struct TlsSessionConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl TlsSessionConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("ring supports the default protocol versions")
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            tls: TlsConnector::from(Arc::new(config)),
            connect_timeout,
        }
    }
}

impl Default for TlsSessionConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl std::fmt::Debug for TlsSessionConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSessionConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionConnector for TlsSessionConnector {
    type Stream = TlsStream<TcpStream>;

    async fn open(&self, host: &str, port: u16) -> Result<Self::Stream, SessionError> {
        let connection_error = |reason: String| SessionError::Connection {
            host: host.to_string(),
            reason,
        };

        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| connection_error(format!("invalid server name: {e}")))?;

        let handshake = async {
            let tcp = TcpStream::connect((host, port))
                .await
                .map_err(|e| connection_error(e.to_string()))?;
            debug!(host, port, "TCP connected, starting TLS handshake");
            self.tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| connection_error(format!("TLS handshake failed: {e}")))
        };

        tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "connect",
                after: self.connect_timeout,
            })?
    }
}
