//! Port Interfaces
//!
//! Defines the interfaces (ports) between the stream session and the
//! outside world following the Hexagonal Architecture pattern. Infrastructure
//! adapters implement the driven ports; consumers implement the listener.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: Factory that opens a fresh `Transport` for every session start
//! - `Transport`: The live encrypted byte stream to the Betfair stream server
//!
//! ## Driver Ports (Inbound)
//!
//! - `StreamListener`: Receives decoded frames and decides whether the
//!   session keeps running

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::infrastructure::betfair::messages::StreamMessage;

// =============================================================================
// Endpoint
// =============================================================================

/// Host and port of a stream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// DNS name, also used as the TLS server name.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while establishing a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Host name could not be resolved.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TCP connection could not be established.
    #[error("TCP connect to {endpoint} failed: {source}")]
    Tcp {
        /// Endpoint being connected.
        endpoint: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with {endpoint} failed: {source}")]
    Tls {
        /// Endpoint being connected.
        endpoint: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Host is not a valid TLS server name.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// Connecting took longer than the configured timeout.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Endpoint being connected.
        endpoint: String,
        /// Configured deadline.
        timeout: Duration,
    },
}

/// Errors raised by an established transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Read or write failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No data arrived within the configured timeout.
    #[error("no data received within {0:?}")]
    Timeout(Duration),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Transport was already closed locally.
    #[error("transport is closed")]
    Closed,

    /// More than `limit` bytes arrived without a frame delimiter.
    #[error("{pending} bytes buffered without a frame delimiter (limit {limit})")]
    FrameTooLarge {
        /// Bytes buffered when the read gave up.
        pending: usize,
        /// Configured limit.
        limit: usize,
    },
}

// =============================================================================
// Transport Ports
// =============================================================================

/// A live, bidirectional stream connection.
///
/// The read and write directions are independent: `send` may be called from
/// the caller's context while `receive_chunk` is pending in the read loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one serialized frame to the socket in full.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Perform a single read of at most `max_len` bytes.
    ///
    /// Never returns an empty chunk: a closed peer is reported as
    /// [`TransportError::ConnectionClosed`].
    async fn receive_chunk(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Release the socket. Safe to call more than once.
    async fn close(&self);
}

/// Factory for transports, invoked once per session start.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `endpoint`, applying `timeout` to the connect
    /// and to every subsequent read.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, ConnectError>;
}

// =============================================================================
// Listener Port
// =============================================================================

/// Consumer of decoded stream messages.
///
/// Invoked on the read loop's hot path, so implementations should decide
/// quickly and hand heavier work to another task.
#[cfg_attr(test, mockall::automock)]
pub trait StreamListener: Send + Sync {
    /// Receives the server greeting of a new connection together with the
    /// session's correlation id.
    fn on_initial(&self, message: StreamMessage, unique_id: u32);

    /// Receives one steady-state message. Returning `false` stops the session.
    fn on_data(&self, message: StreamMessage) -> bool;
}
