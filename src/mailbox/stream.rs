//! Transport for IMAP sessions: plaintext TCP or implicit TLS.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::error::MailboxError;

/// A stream that is either plaintext or TLS.
pub enum ImapStream {
    Plain(TcpStream),
    /// Boxed to keep the enum small.
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Open a TCP connection to `host:port`, wrapping it in TLS when asked.
    pub async fn connect(host: &str, port: u16, tls: bool) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| MailboxError::Connect {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?;

        if !tls {
            return Ok(Self::Plain(tcp));
        }

        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| MailboxError::Tls {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let stream = tls_connector(host)?
            .connect(server_name, tcp)
            .await
            .map_err(|e| MailboxError::Tls {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::Tls(Box::new(stream)))
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// TLS connector trusting the Mozilla root set, with the ring provider
/// selected explicitly so no process-wide default is required.
fn tls_connector(host: &str) -> Result<TlsConnector, MailboxError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MailboxError::Tls {
        host: host.to_string(),
        reason: e.to_string(),
    })?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
