//! Transit Status Binary
//!
//! Starts the transit status aggregation service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin transit-status
//! ```
//!
//! # Environment Variables
//!
//! - `TRANSIT_BROKER`: rest | memory (default: rest)
//! - `REST_PROXY_URL`: Broker REST proxy (default: <http://localhost:8082>)
//! - `KSQL_URL`: Aggregation engine (default: <http://localhost:8088>)
//! - `TRANSIT_CLIENT_ID`: Consumer instance prefix (default: transit-status)
//! - `TRANSIT_TOPIC_*`: Topic name overrides
//! - `TRANSIT_POLL_INTERVAL_MS`: Idle back-off (default: 1000)
//! - `TRANSIT_POLL_TIMEOUT_MS`: Poll bound (default: 100)
//! - `TRANSIT_HEALTH_PORT`: Status HTTP port (default: 8888)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `TRANSIT_LOG_FORMAT`: text | json (default: text)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use transit_status::application::ports::{BrokerAdminPort, ConsumerFactory};
use transit_status::application::services::{
    AggregationService, ConsumerSupervisor, IngestRouter, RecordHandler, StartupError,
    StartupGate, SubscriptionConsumer, SubscriptionSpec, SummaryTableBootstrap, TopicProvisioner,
};
use transit_status::domain::topic::{TopicName, TopicPattern, TopicSpec};
use transit_status::infrastructure::health::{HealthServer, HealthServerState};
use transit_status::infrastructure::telemetry;
use transit_status::{
    BrokerKind, InMemoryBroker, KsqlClient, PipelineConfig, RestProxyClient, RestProxyConfig,
    SchemaGovernedCodec, init_metrics,
};

/// Broker adapters selected by configuration.
struct Broker {
    admin: Arc<dyn BrokerAdminPort>,
    consumers: Arc<dyn ConsumerFactory>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting transit status service");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder not installed");
    }

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let catalog = config.topics.catalog.clone();
    let codec = SchemaGovernedCodec::builtin().context("bundled schemas failed to load")?;
    let broker = connect(&config)?;

    if let Err(e) = prepare_upstream(&config, &broker).await {
        tracing::error!(error = %e, "Startup preconditions not met");
        eprintln!("{e}");
        std::process::exit(1);
    }

    let shutdown_token = CancellationToken::new();

    // Aggregation
    let (aggregation, handler, reader) = AggregationService::new(
        IngestRouter::new(catalog.clone(), codec.clone()),
        config.consumer.channel_capacity,
    );
    let aggregation_cancel = CancellationToken::new();
    let aggregation_task = tokio::spawn(aggregation.run(aggregation_cancel.clone()));

    // Consumers
    let handler: Arc<dyn RecordHandler> = Arc::new(handler);
    let mut supervisor = ConsumerSupervisor::new(&shutdown_token)
        .with_drain_timeout(config.consumer.drain_timeout);
    for (topic, structured) in [
        (&catalog.weather, true),
        (&catalog.reduced_stations, false),
        (&catalog.arrivals, true),
        (&catalog.turnstile_summary, false),
    ] {
        let spec = SubscriptionSpec::new(TopicPattern::from(topic.clone()), Arc::clone(&handler))
            .structured(structured)
            .reset_to_earliest(true)
            .with_timing(config.consumer.poll_interval, config.consumer.poll_timeout);
        supervisor.add(SubscriptionConsumer::from_factory(
            spec,
            broker.consumers.as_ref(),
            codec.clone(),
        ));
    }
    // Consumers hold the only remaining senders.
    drop(handler);

    // Status server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        reader,
        supervisor.statuses().to_vec(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Status server error");
        }
    });

    supervisor.start_all();
    tracing::info!(consumers = supervisor.len(), "Transit status ready");

    await_shutdown(shutdown_token).await;

    supervisor.stop_all().await;
    drop(supervisor);
    aggregation_cancel.cancel();
    if tokio::time::timeout(config.consumer.drain_timeout, aggregation_task)
        .await
        .is_err()
    {
        tracing::warn!("Aggregation drain timed out");
    }
    let _ = health_task.await;

    tracing::info!("Transit status stopped");
    Ok(())
}

/// Build the broker adapters for the configured backend.
fn connect(config: &PipelineConfig) -> anyhow::Result<Broker> {
    match config.broker.kind {
        BrokerKind::Rest => {
            let mut proxy = RestProxyConfig::new(
                config.broker.rest_proxy_url.clone(),
                config.broker.client_id.clone(),
            );
            proxy.timeout = config.broker.request_timeout;
            let client = RestProxyClient::new(&proxy).context("REST proxy client")?;
            Ok(Broker {
                admin: Arc::new(client.clone()),
                consumers: Arc::new(client),
            })
        }
        BrokerKind::Memory => {
            let broker = InMemoryBroker::new();
            Ok(Broker {
                admin: Arc::new(broker.clone()),
                consumers: Arc::new(broker),
            })
        }
    }
}

/// Bootstrap the summary table and verify upstream outputs exist.
///
/// With the in-process broker there are no upstream stages, so the
/// consumed topics are provisioned locally instead.
async fn prepare_upstream(config: &PipelineConfig, broker: &Broker) -> Result<(), StartupError> {
    let catalog = &config.topics.catalog;

    if config.broker.kind == BrokerKind::Memory {
        let provisioner = TopicProvisioner::new(Arc::clone(&broker.admin));
        let consumed: [&TopicName; 4] = [
            &catalog.weather,
            &catalog.reduced_stations,
            &catalog.arrivals,
            &catalog.turnstile_summary,
        ];
        for topic in consumed {
            let spec = TopicSpec::new(
                topic.clone(),
                config.topics.partitions,
                config.topics.replication_factor,
            );
            if let Err(e) = provisioner.ensure(&spec).await {
                tracing::warn!(topic = %topic, error = %e, "Local topic not provisioned");
            }
        }
    } else {
        let engine = KsqlClient::new(config.broker.ksql_url.clone(), config.broker.request_timeout)?;
        SummaryTableBootstrap::ensure(broker.admin.as_ref(), &engine, catalog).await?;
    }

    StartupGate::for_catalog(catalog)
        .verify(broker.admin.as_ref())
        .await
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        broker = config.broker.kind.as_str(),
        rest_proxy_url = %config.broker.rest_proxy_url,
        ksql_url = %config.broker.ksql_url,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        arrivals = %config.topics.catalog.arrivals,
        reduced_stations = %config.topics.catalog.reduced_stations,
        turnstile_summary = %config.topics.catalog.turnstile_summary,
        weather = %config.topics.catalog.weather,
        poll_interval_ms = config.consumer.poll_interval.as_millis(),
        poll_timeout_ms = config.consumer.poll_timeout.as_millis(),
        "Consumer settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
