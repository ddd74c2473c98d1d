//! Betfair Stream Message Types
//!
//! Wire format types for the Exchange Stream API. Every frame is a JSON
//! object carrying an `op` discriminator.
//!
//! # Outbound Operations
//! - `authentication`: App key and session token for the connection
//! - `heartbeat`: Keep-alive, answered with a `status`
//! - `marketSubscription`: Market filter plus data filter
//! - `orderSubscription`: Order stream for the logged-in account
//!
//! # Inbound Operations
//! - `connection`: Greeting sent once after the TLS handshake
//! - `status`: Result of a request, or a server-side failure
//! - `mcm`: Market change message
//! - `ocm`: Order change message
//!
//! The contents of `mc` / `oc` change arrays are kept as raw JSON; building
//! a market or order cache from them is the consumer's job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Inbound Messages
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// `op: "connection"`.
    Connection(ConnectionMessage),
    /// `op: "status"`.
    Status(StatusMessage),
    /// `op: "mcm"`.
    MarketChange(ChangeMessage),
    /// `op: "ocm"`.
    OrderChange(ChangeMessage),
    /// Any other object, including ones without an `op`.
    Other(Value),
}

impl StreamMessage {
    /// The `op` discriminator, or `"unknown"` when absent.
    #[must_use]
    pub fn op(&self) -> &str {
        match self {
            Self::Connection(_) => "connection",
            Self::Status(_) => "status",
            Self::MarketChange(_) => "mcm",
            Self::OrderChange(_) => "ocm",
            Self::Other(value) => value.get("op").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Correlation id echoed by the server, if any.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Connection(m) => m.id,
            Self::Status(m) => m.id,
            Self::MarketChange(m) | Self::OrderChange(m) => m.id,
            Self::Other(value) => value
                .get("id")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok()),
        }
    }
}

/// Greeting sent by the server once the connection is established.
///
/// # Wire Format
/// ```json
/// {"op":"connection","connectionId":"002-051134157842-432409"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMessage {
    /// Correlation id, if the server echoed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Server-assigned connection id, useful when contacting support.
    pub connection_id: String,
}

/// Outcome reported by a `status` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Request accepted.
    Success,
    /// Request rejected; see `error_code`.
    Failure,
}

/// Error codes carried by failed `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No app key supplied in the authentication message.
    NoAppKey,
    /// App key unknown or not enabled for streaming.
    InvalidAppKey,
    /// No session token supplied.
    NoSession,
    /// Session token expired or invalid.
    InvalidSessionInformation,
    /// Account not permitted to use the stream.
    NotAuthorized,
    /// Malformed request.
    InvalidInput,
    /// Resubscription clock not recognised.
    InvalidClock,
    /// Internal server error.
    UnexpectedError,
    /// Connection idle for too long.
    Timeout,
    /// Too many markets in the subscription.
    SubscriptionLimitExceeded,
    /// Unknown operation.
    InvalidRequest,
    /// Server failed to establish the connection.
    ConnectionFailed,
    /// Too many concurrent connections for the app key.
    MaxConnectionLimitExceeded,
    /// Request rate too high.
    TooManyRequests,
    /// A code this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Response to a request or an unsolicited failure notice.
///
/// # Wire Format
/// ```json
/// {"op":"status","id":1,"statusCode":"SUCCESS","connectionClosed":false}
/// {"op":"status","statusCode":"FAILURE","errorCode":"INVALID_SESSION_INFORMATION",
///  "errorMessage":"...","connectionClosed":true}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    /// Correlation id of the request this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Success or failure.
    pub status_code: StatusCode,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Human readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether the server is closing the connection.
    #[serde(default)]
    pub connection_closed: bool,
    /// Connection id, echoed on some responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Remaining connections allowed for the app key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections_available: Option<u32>,
}

impl StatusMessage {
    /// Whether the request succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status_code, StatusCode::Success)
    }
}

/// Kind of change carried by a change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// Full image after (re)subscribing.
    SubImage,
    /// Delta after resubscribing from a clock.
    ResubDelta,
    /// Keep-alive with no changes.
    Heartbeat,
}

/// Segment marker for images split across several frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    /// First segment.
    SegStart,
    /// Middle segment.
    Seg,
    /// Last segment.
    SegEnd,
}

/// Market (`mcm`) or order (`ocm`) change message.
///
/// # Wire Format
/// ```json
/// {"op":"mcm","id":2,"initialClk":"G1...","clk":"AAAA","conflateMs":0,
///  "heartbeatMs":5000,"pt":1465707449340,"ct":"SUB_IMAGE","mc":[...]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    /// Correlation id of the subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Clock token for resubscribing from this point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    /// Initial clock token, sent with images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    /// Publish time in epoch milliseconds.
    #[serde(rename = "pt", default)]
    pub publish_time_ms: i64,
    /// Absent for ordinary deltas.
    #[serde(rename = "ct", default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    /// Present when an image is segmented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_type: Option<SegmentType>,
    /// Conflation interval granted by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
    /// Heartbeat interval granted by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    /// Set to 503 while the stream is degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Raw `mc` / `oc` entries.
    #[serde(default, alias = "mc", alias = "oc")]
    pub changes: Vec<Value>,
}

impl ChangeMessage {
    /// Publish time as a UTC timestamp.
    #[must_use]
    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.publish_time_ms)
    }

    /// Whether this is a keep-alive with no changes.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self.change_type, Some(ChangeType::Heartbeat))
    }
}

// =============================================================================
// Subscription Filters
// =============================================================================

/// Selects which markets a market subscription covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    /// Explicit market ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_ids: Vec<String>,
    /// Restrict to BSP or non-BSP markets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsp_market: Option<bool>,
    /// Betting types, e.g. `ODDS`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub betting_types: Vec<String>,
    /// Event type ids, e.g. `7` for horse racing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_type_ids: Vec<String>,
    /// Event ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_ids: Vec<String>,
    /// Restrict to markets that will turn in play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_in_play_enabled: Option<bool>,
    /// Market types, e.g. `WIN`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market_types: Vec<String>,
    /// Venues.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,
    /// ISO country codes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country_codes: Vec<String>,
    /// Race types, e.g. `Flat`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub race_types: Vec<String>,
}

impl MarketFilter {
    /// Filter on explicit market ids.
    #[must_use]
    pub fn markets<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            market_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add event type ids.
    #[must_use]
    pub fn with_event_type_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_type_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add market types.
    #[must_use]
    pub fn with_market_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.market_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Add country codes.
    #[must_use]
    pub fn with_country_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.country_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Whether the filter selects nothing explicitly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Price data fields that a market subscription can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketDataField {
    /// Best prices including virtual bets.
    ExBestOffersDisp,
    /// Best prices, depth set by `ladderLevels`.
    ExBestOffers,
    /// Full available-to-back/lay ladder.
    ExAllOffers,
    /// Traded ladder.
    ExTraded,
    /// Total traded volume.
    ExTradedVol,
    /// Last traded price.
    ExLtp,
    /// Market definition.
    ExMarketDef,
    /// Starting price ladders.
    SpTraded,
    /// Projected starting prices.
    SpProjected,
}

/// Selects which data a market subscription delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataFilter {
    /// Requested fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<MarketDataField>,
    /// Ladder depth for `EX_BEST_OFFERS`, 1 to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ladder_levels: Option<u8>,
}

impl MarketDataFilter {
    /// Request the given fields.
    #[must_use]
    pub fn fields(fields: impl IntoIterator<Item = MarketDataField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
            ladder_levels: None,
        }
    }

    /// Set the ladder depth.
    #[must_use]
    pub const fn with_ladder_levels(mut self, levels: u8) -> Self {
        self.ladder_levels = Some(levels);
        self
    }
}

/// Restricts an order subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    /// Include the overall position per runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_overall_position: Option<bool>,
    /// Only orders placed with these strategy refs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub customer_strategy_refs: Vec<String>,
    /// Split matched amounts by strategy ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_matched_by_strategy_ref: Option<bool>,
}

/// Resubscription and delivery options shared by both subscription kinds.
///
/// Unset options are left off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    /// Initial clock from a previous image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_clk: Option<String>,
    /// Latest clock seen, to resume with a delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clk: Option<String>,
    /// Requested conflation interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflate_ms: Option<u64>,
    /// Requested heartbeat interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
    /// Allow the server to segment large images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_enabled: Option<bool>,
}

impl SubscriptionOptions {
    /// Options that resume from the clocks of a previous subscription.
    #[must_use]
    pub fn resume(initial_clk: impl Into<String>, clk: impl Into<String>) -> Self {
        Self {
            initial_clk: Some(initial_clk.into()),
            clk: Some(clk.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// An outbound control operation.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RequestMessage {
    /// Authenticate the connection.
    Authentication {
        /// Correlation id.
        id: u32,
        /// Application key.
        app_key: String,
        /// Session token from the REST login.
        session: String,
    },
    /// Keep the connection alive.
    Heartbeat {
        /// Correlation id.
        id: u32,
    },
    /// Subscribe to market changes.
    MarketSubscription {
        /// Correlation id.
        id: u32,
        /// Markets to cover.
        market_filter: MarketFilter,
        /// Data to deliver.
        market_data_filter: MarketDataFilter,
        /// Resubscription options.
        #[serde(flatten)]
        options: SubscriptionOptions,
    },
    /// Subscribe to order changes.
    OrderSubscription {
        /// Correlation id.
        id: u32,
        /// Order restriction.
        #[serde(skip_serializing_if = "Option::is_none")]
        order_filter: Option<OrderFilter>,
        /// Resubscription options.
        #[serde(flatten)]
        options: SubscriptionOptions,
    },
}

impl RequestMessage {
    /// The `op` value sent on the wire.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::Heartbeat { .. } => "heartbeat",
            Self::MarketSubscription { .. } => "marketSubscription",
            Self::OrderSubscription { .. } => "orderSubscription",
        }
    }

    /// Correlation id of the request.
    #[must_use]
    pub const fn id(&self) -> u32 {
        match self {
            Self::Authentication { id, .. }
            | Self::Heartbeat { id }
            | Self::MarketSubscription { id, .. }
            | Self::OrderSubscription { id, .. } => *id,
        }
    }
}

impl fmt::Debug for RequestMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMessage")
            .field("op", &self.op())
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}
