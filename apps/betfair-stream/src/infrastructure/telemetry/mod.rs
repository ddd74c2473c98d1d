//! Tracing Subscriber and OTLP Export
//!
//! Installs the `tracing` subscriber used by the binary: a fmt layer behind
//! an `EnvFilter`, plus an OpenTelemetry layer when export is enabled. The
//! session's identity (environment, description, correlation id, endpoint)
//! is attached to the exported resource so spans from several stream
//! processes can be told apart.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Filter directives, replacing the defaults when set
//! - `OTEL_ENABLED`: "1" or "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: betfair-stream)

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::{Environment, SessionSettings};

const DEFAULT_SERVICE_NAME: &str = "betfair-stream";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives used when `RUST_LOG` is unset. The TLS and exporter stacks
/// are noisy at info.
pub const DEFAULT_DIRECTIVES: &[&str] = &[
    "info",
    "betfair_stream=info",
    "rustls=warn",
    "tokio_rustls=warn",
    "h2=warn",
    "tonic=warn",
];

/// Shuts the tracer provider down, flushing pending spans, when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether spans are exported over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
    /// Raw `RUST_LOG` value, if set.
    pub log_directives: Option<String>,
    /// Extra resource attributes attached to exported spans.
    pub resource_attributes: Vec<(&'static str, String)>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_directives: None,
            resource_attributes: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.service_name),
            log_directives: lookup("RUST_LOG").filter(|v| !v.trim().is_empty()),
            resource_attributes: Vec::new(),
        }
    }

    /// Attach the identity of the stream session to exported spans.
    #[must_use]
    pub fn with_session(mut self, environment: Environment, session: &SessionSettings) -> Self {
        self.resource_attributes.extend([
            ("deployment.environment", environment.as_str().to_string()),
            ("betfair.stream.description", session.description.clone()),
            ("betfair.stream.unique_id", session.unique_id.to_string()),
            ("server.address", session.endpoint().to_string()),
        ]);
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes(
                self.resource_attributes
                    .iter()
                    .map(|(key, value)| KeyValue::new(*key, value.clone())),
            )
            .build()
    }
}

/// Build the log filter: `RUST_LOG` when given and valid, otherwise
/// [`DEFAULT_DIRECTIVES`].
#[must_use]
pub fn build_filter(rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("Ignoring invalid RUST_LOG {directives:?}: {e}"),
        }
    }
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::default(), EnvFilter::add_directive)
}

/// Initialize telemetry from the environment alone.
///
/// The returned guard must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// The returned guard must be kept alive for the duration of the program.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = build_filter(config.log_directives.as_deref());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .map_err(|e| eprintln!("Failed to create OTLP exporter, logging only: {e}"))
            .ok()
    } else {
        None
    };

    let Some(exporter) = exporter else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return TelemetryGuard {
            tracer_provider: None,
        };
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build();
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(config.service_name));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}
