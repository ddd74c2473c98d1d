//! Loopback stream server and plain-TCP connector shared by the
//! integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use betfair_stream::infrastructure::betfair::StreamTransport;
use betfair_stream::{ConnectError, Connector, Endpoint, SessionSettings, Transport};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// How long a test waits for any single network step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects without TLS, for talking to [`FakeServer`].
pub struct PlainTcpConnector;

#[async_trait]
impl Connector for PlainTcpConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn Transport>, ConnectError> {
        let address = endpoint.to_string();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: address.clone(),
                timeout,
            })?
            .map_err(|source| ConnectError::Tcp {
                endpoint: address.clone(),
                source,
            })?;
        Ok(Arc::new(StreamTransport::new(stream, timeout)))
    }
}

/// A stream server on a random loopback port.
pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    /// Session settings pointing at this server.
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            host: "127.0.0.1".to_string(),
            port: self.listener.local_addr().unwrap().port(),
            timeout: STEP_TIMEOUT,
            ..SessionSettings::default()
        }
    }

    /// Accept one client and send it the connection greeting.
    pub async fn accept_and_greet(&self, connection_id: &str) -> ServerConnection {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client should connect")
            .unwrap();
        let (reader, writer) = stream.into_split();
        let mut connection = ServerConnection {
            reader: BufReader::new(reader),
            writer,
        };
        connection
            .send_json(&serde_json::json!({"op": "connection", "connectionId": connection_id}))
            .await;
        connection
    }
}

/// Server side of one accepted connection.
pub struct ServerConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConnection {
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_json(&mut self, value: &Value) {
        let mut frame = serde_json::to_string(value).unwrap();
        frame.push_str("\r\n");
        self.write_raw(frame.as_bytes()).await;
    }

    /// Read the next client request as JSON.
    pub async fn read_request(&mut self) -> Value {
        let mut line = String::new();
        let read = tokio::time::timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("client should send a request")
            .unwrap();
        assert!(read > 0, "client closed the connection");
        assert!(line.ends_with("\r\n"), "request not CRLF terminated: {line:?}");
        serde_json::from_str(line.trim_end()).unwrap()
    }

    /// Wait until the client closes its side.
    pub async fn expect_eof(&mut self) {
        let mut line = String::new();
        let read = tokio::time::timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("client should close the connection")
            .unwrap_or(0);
        assert_eq!(read, 0, "unexpected data: {line:?}");
    }
}
