//! Stream Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::application::ports::Endpoint;
use crate::infrastructure::betfair::messages::MarketFilter;

/// Betfair exchange environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production exchange.
    #[default]
    Live,
    /// Integration (pre-production) exchange.
    Integration,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "INTEGRATION" | "INT" => Self::Integration,
            _ => Self::Live,
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Integration => "integration",
        }
    }

    /// Stream API host of this environment.
    #[must_use]
    pub const fn stream_host(&self) -> &'static str {
        match self {
            Self::Live => "stream-api.betfair.com",
            Self::Integration => "stream-api-integration.betfair.com",
        }
    }
}

/// Betfair API credentials.
#[derive(Clone)]
pub struct Credentials {
    app_key: String,
    session_token: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_key: String, session_token: String) -> Self {
        Self {
            app_key,
            session_token,
        }
    }

    /// Get the application key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Get the session token.
    #[must_use]
    pub fn session_token(&self) -> &str {
        &self.session_token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .finish()
    }
}

/// Settings of a single stream session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Correlation id sent with control messages.
    pub unique_id: u32,
    /// Stream server host.
    pub host: String,
    /// Stream server port.
    pub port: u16,
    /// Connect and read timeout.
    pub timeout: Duration,
    /// Maximum bytes per socket read.
    pub buffer_size: usize,
    /// Label attached to the session's log records.
    pub description: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            unique_id: 1,
            host: Environment::default().stream_host().to_string(),
            port: 443,
            timeout: Duration::from_secs(64),
            buffer_size: 1024,
            description: "betfair-stream".to_string(),
        }
    }
}

impl SessionSettings {
    /// The server to connect to.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// Keep-alive and reconnection settings of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Interval between heartbeat requests.
    pub heartbeat_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// What the supervisor subscribes to after authenticating.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSettings {
    /// Explicit market ids.
    pub market_ids: Vec<String>,
    /// Event type ids.
    pub event_type_ids: Vec<String>,
    /// Whether to open the order stream.
    pub subscribe_orders: bool,
}

impl SubscriptionSettings {
    /// Market filter for the configured markets, if any were configured.
    #[must_use]
    pub fn market_filter(&self) -> Option<MarketFilter> {
        let filter = MarketFilter::markets(self.market_ids.iter().cloned())
            .with_event_type_ids(self.event_type_ids.iter().cloned());
        (!filter.is_empty()).then_some(filter)
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Exchange environment.
    pub environment: Environment,
    /// API credentials.
    pub credentials: Credentials,
    /// Session settings.
    pub session: SessionSettings,
    /// Keep-alive and reconnection settings.
    pub supervisor: SupervisorSettings,
    /// Subscriptions to open after authentication.
    pub subscription: SubscriptionSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_key = required(&lookup, "BETFAIR_APP_KEY")?;
        let session_token = required(&lookup, "BETFAIR_SESSION_TOKEN")?;

        let environment = lookup("BETFAIR_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let defaults = SessionSettings::default();
        let session = SessionSettings {
            unique_id: parse_env(&lookup, "BETFAIR_STREAM_UNIQUE_ID", defaults.unique_id),
            host: lookup("BETFAIR_STREAM_HOST")
                .filter(|host| !host.is_empty())
                .unwrap_or_else(|| environment.stream_host().to_string()),
            port: parse_env(&lookup, "BETFAIR_STREAM_PORT", defaults.port),
            timeout: parse_env_duration_secs(
                &lookup,
                "BETFAIR_STREAM_TIMEOUT_SECS",
                defaults.timeout,
            ),
            buffer_size: parse_env(&lookup, "BETFAIR_STREAM_BUFFER_SIZE", defaults.buffer_size),
            description: lookup("BETFAIR_STREAM_DESCRIPTION")
                .filter(|d| !d.is_empty())
                .unwrap_or(defaults.description),
        };

        let defaults = SupervisorSettings::default();
        let supervisor = SupervisorSettings {
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "BETFAIR_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                &lookup,
                "BETFAIR_STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                &lookup,
                "BETFAIR_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                &lookup,
                "BETFAIR_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env(
                &lookup,
                "BETFAIR_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let subscription = SubscriptionSettings {
            market_ids: parse_env_list(&lookup, "BETFAIR_STREAM_MARKET_IDS"),
            event_type_ids: parse_env_list(&lookup, "BETFAIR_STREAM_EVENT_TYPE_IDS"),
            subscribe_orders: parse_env_bool(&lookup, "BETFAIR_STREAM_SUBSCRIBE_ORDERS"),
        };

        let server = ServerSettings {
            metrics_port: parse_env(
                &lookup,
                "BETFAIR_STREAM_METRICS_PORT",
                ServerSettings::default().metrics_port,
            ),
        };

        Ok(Self {
            environment,
            credentials: Credentials::new(app_key, session_token),
            session,
            supervisor,
            subscription,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_bool<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn parse_env_list<F>(lookup: &F, key: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
