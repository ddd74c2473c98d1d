#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Betfair Stream - Exchange Stream API Client
//!
//! A persistent, authenticated client for the Betfair Exchange Stream API.
//! It keeps one TLS connection per session, sends authentication,
//! subscription and heartbeat requests, and turns the `\r\n`-delimited JSON
//! stream into typed messages for a listener.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Session lifecycle with no I/O
//!   - `session`: State machine and running flag
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport, connector and listener interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `betfair`: Transport, framing, codec, session, supervisor
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! TLS socket ──────► │ Frame Reader │──►│  Read Loop  │──►│ Dispatcher │──► Listener
//!      ▲             └──────────────┘   └─────────────┘   └────────────┘
//!      │                                                        │ false
//!      └──── Control Protocol (auth, heartbeat, subscribe)      ▼
//!                                                              stop()
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Session lifecycle types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{RunningFlag, SessionState};

// Ports
pub use application::ports::{
    ConnectError, Connector, Endpoint, StreamListener, Transport, TransportError,
};

// Stream client
pub use infrastructure::betfair::{
    ChannelListener, KeepAlive, MarketDataField, MarketDataFilter, MarketFilter, OrderFilter,
    ReconnectConfig, ReconnectPolicy, StreamError, StreamEvent, StreamMessage, StreamSession,
    SubscriptionOptions, Supervisor, SupervisorError, TlsStreamConnector,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, Environment, ServerSettings, SessionSettings, StreamConfig,
    SubscriptionSettings, SupervisorSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
