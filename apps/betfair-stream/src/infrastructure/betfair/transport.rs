//! TLS Transport
//!
//! The encrypted TCP connection to the stream server. The stream is split
//! into independently locked read and write halves so that control
//! messages can be written while the read loop is parked in a read.
//!
//! `StreamTransport` works over any `AsyncRead + AsyncWrite` stream; the
//! `TlsStreamConnector` produces one over rustls for production use.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::application::ports::{ConnectError, Connector, Endpoint, Transport, TransportError};

// =============================================================================
// Stream Transport
// =============================================================================

/// A [`Transport`] over a split byte stream.
pub struct StreamTransport<S> {
    reader: Mutex<Option<ReadHalf<S>>>,
    writer: Mutex<Option<WriteHalf<S>>>,
    read_timeout: Duration,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a connected stream. A zero `read_timeout` disables the deadline.
    #[must_use]
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            read_timeout,
        }
    }
}

impl<S> fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn receive_chunk(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;

        let mut buf = vec![0u8; max_len.max(1)];
        let read = if self.read_timeout.is_zero() {
            reader.read(&mut buf).await?
        } else {
            tokio::time::timeout(self.read_timeout, reader.read(&mut buf))
                .await
                .map_err(|_| TransportError::Timeout(self.read_timeout))??
        };

        if read == 0 {
            return Err(TransportError::ConnectionClosed);
        }

        buf.truncate(read);
        Ok(buf)
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(e) = writer.shutdown().await
        {
            tracing::debug!(error = %e, "Error shutting down stream writer");
        }
        self.reader.lock().await.take();
    }
}

// =============================================================================
// TLS Connector
// =============================================================================

/// Opens TLS connections validated against the webpki root store.
#[derive(Clone)]
pub struct TlsStreamConnector {
    config: Arc<ClientConfig>,
}

impl TlsStreamConnector {
    /// Create a connector with the default root store and ring provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the crypto provider rejects the default
    /// protocol versions.
    pub fn new() -> Result<Self, ConnectError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::TlsConfig(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self::with_config(Arc::new(config)))
    }

    /// Create a connector from an existing client configuration.
    #[must_use]
    pub const fn with_config(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ConnectError> {
        let label = endpoint.to_string();

        let addrs: Vec<_> = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|source| ConnectError::Resolve {
                endpoint: label.clone(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ConnectError::Resolve {
                endpoint: label,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            });
        }

        let tcp = TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|source| ConnectError::Tcp {
                endpoint: label.clone(),
                source,
            })?;

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|_| ConnectError::InvalidServerName(endpoint.host.clone()))?;

        tokio_rustls::TlsConnector::from(Arc::clone(&self.config))
            .connect(server_name, tcp)
            .await
            .map_err(|source| ConnectError::Tls {
                endpoint: label,
                source,
            })
    }
}

impl fmt::Debug for TlsStreamConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStreamConnector").finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for TlsStreamConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, ConnectError> {
        tracing::debug!(%endpoint, timeout_secs = timeout.as_secs(), "Opening TLS connection");

        let stream = tokio::time::timeout(timeout, self.open(endpoint))
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: endpoint.to_string(),
                timeout,
            })??;

        Ok(Arc::new(StreamTransport::new(stream, timeout)))
    }
}
