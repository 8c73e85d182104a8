#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Transit Status - Streaming Aggregation Service
//!
//! Consumes transit telemetry topics and maintains a live per-line
//! operational snapshot: station topology, the latest train arrival per
//! direction, running turnstile totals, and the current weather.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and the aggregation state machine
//!   - `topic`: Topic names, subscription patterns, the topic catalog
//!   - `records`: Wire record types
//!   - `lines`: Per-line station state and the line aggregator
//!   - `weather`, `snapshot`: Weather state and the read view
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Broker admin, producer, consumer and aggregation engine
//!   - `services`: Provisioning, producing, consuming, supervision,
//!     aggregation and startup checks
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `codec`: Schema-governed envelope and raw JSON codecs
//!   - `memory`, `rest_proxy`: Broker adapters
//!   - `ksql`: Aggregation engine adapter
//!   - `config`, `telemetry`, `metrics`: Ambient concerns
//!   - `health`: Status HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! weather ──────────┐
//! stations.reduced ─┤    ┌────────────┐    ┌─────────────┐    ┌──────────┐
//!                   ├───►│ Consumers  │───►│ Aggregation │───►│ Snapshot │──► /snapshot
//! arrivals ─────────┤    │ (1 task ea)│    │ (1 writer)  │    └──────────┘
//! TURNSTILE_SUMMARY ┘    └────────────┘    └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::lines::{LineAggregator, LineColor, LineState, StationEntry};
pub use domain::snapshot::{AggregatedSnapshot, TransitState};
pub use domain::topic::{TopicCatalog, TopicName, TopicPattern, TopicSpec};

// Ports
pub use application::ports::{
    AggregationEnginePort, BrokerAdminPort, BrokerError, ConsumerFactory, ConsumerPort,
    ProducerPort,
};

// Services
pub use application::services::{
    AggregationService, ConsumerSupervisor, EventProducer, IngestRouter, SnapshotReader,
    StartupError, StartupGate, SubscriptionConsumer, SubscriptionSpec, SummaryTableBootstrap,
    TopicProvisioner,
};

// Infrastructure config
pub use infrastructure::config::{
    BrokerKind, BrokerSettings, ConfigError, ConsumerSettings, PipelineConfig, ServerSettings,
    TopicSettings,
};

// Codec
pub use infrastructure::codec::{CodecError, JsonCodec, SchemaGovernedCodec, SchemaRegistry};

// Broker adapters
pub use infrastructure::ksql::KsqlClient;
pub use infrastructure::memory::InMemoryBroker;
pub use infrastructure::rest_proxy::{RestProducer, RestProxyClient, RestProxyConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    LogFormat, TelemetryConfig, TelemetryGuard, init as init_telemetry,
};
