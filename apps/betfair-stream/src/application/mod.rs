//! Application Layer - Port definitions.
//!
//! This layer contains the interfaces that connect the stream session to
//! the transport it reads from and the listener it feeds.

/// Port interfaces for transports, connectors and listeners.
pub mod ports;
