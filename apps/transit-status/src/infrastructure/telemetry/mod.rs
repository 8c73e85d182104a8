//! Logging and Trace Export
//!
//! One `tracing` subscriber for the whole service: an env-filtered console
//! layer (text or JSON lines) and, unless disabled, an OTLP span exporter.
//! Consumer tasks run inside [`consumer_span`], so every line a consumer
//! logs carries its pattern and group.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: "false" disables span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name on exported spans (default: transit-status)
//! - `TRANSIT_LOG_FORMAT`: `text` or `json` (default: text)
//! - `RUST_LOG`: Extra filter directives

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::domain::topic::TopicPattern;

const DEFAULT_SERVICE_NAME: &str = "transit-status";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Directives applied on top of `RUST_LOG`. HTTP client internals are noisy
/// at info while the REST proxy is long-polled.
const DEFAULT_DIRECTIVES: [&str; 4] = ["transit_status=info", "reqwest=warn", "h2=warn", "hyper=warn"];

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
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
    /// Service name on exported spans.
    pub service_name: String,
    /// Console output format.
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration from an arbitrary key lookup.
    ///
    /// Unrecognised values fall back to the defaults; telemetry never stops
    /// the service from starting.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: lookup("OTEL_ENABLED").is_none_or(|v| !v.eq_ignore_ascii_case("false")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_format: lookup("TRANSIT_LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }
}

/// Shuts the span exporter down when dropped, flushing buffered spans.
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

/// Install the subscriber using configuration from the environment.
///
/// Keep the returned guard alive for the life of the process.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber.
///
/// Falls back to console-only logging if the OTLP exporter cannot be built.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let (tracer_provider, export_error) = if config.enabled {
        match build_tracer_provider(&config) {
            Ok(provider) => (Some(provider), None),
            Err(e) => (None, Some(e)),
        }
    } else {
        (None, None)
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });
    let (text_layer, json_layer) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer().with_target(true)), None),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .init();

    if let Some(e) = export_error {
        tracing::warn!(
            endpoint = %config.otlp_endpoint,
            error = %e,
            "OTLP exporter unavailable, logging to console only"
        );
    }

    TelemetryGuard { tracer_provider }
}

/// Span wrapping one consumer task.
#[must_use]
pub fn consumer_span(pattern: &TopicPattern) -> tracing::Span {
    tracing::info_span!(
        "consumer",
        pattern = %pattern,
        group_id = %pattern.group_id()
    )
}

#[allow(clippy::expect_used)]
fn env_filter() -> EnvFilter {
    DEFAULT_DIRECTIVES
        .iter()
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive.parse().expect("static directive is valid"))
        })
}

fn build_tracer_provider(
    config: &TelemetryConfig,
) -> Result<SdkTracerProvider, opentelemetry_otlp::ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
                .build(),
        )
        .build())
}
