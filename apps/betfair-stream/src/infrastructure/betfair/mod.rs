//! Betfair Exchange Stream Adapters
//!
//! Implements the client side of the Exchange Stream API:
//!
//! - **Transport**: TLS socket with independent read and write halves
//! - **Framing**: `\r\n`-delimited frames reassembled from socket reads
//! - **Codec**: JSON encoding of control messages, decoding by `op`
//! - **Session**: Lifecycle, read loop and control protocol
//! - **Dispatch**: Listener delivery and stop signalling
//! - **Supervisor**: Handshake, keep-alive and reconnection with backoff

pub mod codec;
pub mod dispatch;
pub mod framing;
pub mod keepalive;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use codec::{CodecError, JsonCodec};
pub use dispatch::{ChannelListener, Dispatcher, StreamEvent};
pub use framing::{FRAME_DELIMITER, FrameReader, split_frames};
pub use keepalive::KeepAlive;
pub use messages::*;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{StreamError, StreamSession};
pub use supervisor::{Supervisor, SupervisorError};
pub use transport::{StreamTransport, TlsStreamConnector};
