//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Schema-governed and raw JSON record codecs.
pub mod codec;

/// In-process broker adapter.
pub mod memory;

/// Broker REST proxy adapter.
pub mod rest_proxy;

/// Aggregation engine HTTP adapter.
pub mod ksql;

/// Configuration loading.
pub mod config;

/// Status and health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
