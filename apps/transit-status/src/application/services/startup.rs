//! Startup Preconditions
//!
//! The status service reads topics produced by upstream stages it does not
//! run itself. [`SummaryTableBootstrap`] submits the turnstile aggregation
//! to the aggregation engine if its output topic is missing, and
//! [`StartupGate`] refuses to start while any upstream output is absent.

use crate::application::ports::{AggregationEnginePort, BrokerAdminPort, BrokerError};
use crate::domain::topic::{TopicCatalog, TopicName};

/// Startup errors.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// An upstream stage has not produced its output topic yet.
    #[error("required topic {topic} does not exist; ensure that {stage} has run successfully before starting")]
    MissingUpstream {
        /// Missing topic.
        topic: TopicName,
        /// Stage responsible for producing it.
        stage: String,
    },

    /// The broker or aggregation engine could not be queried.
    #[error("startup check failed: {0}")]
    Broker(#[from] BrokerError),
}

// =============================================================================
// Upstream Gate
// =============================================================================

/// A topic that must exist before startup, and the stage that creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequirement {
    /// Required topic.
    pub topic: TopicName,
    /// Operator-facing name of the producing stage.
    pub stage: String,
}

impl UpstreamRequirement {
    /// Create a requirement.
    pub fn new(topic: TopicName, stage: impl Into<String>) -> Self {
        Self {
            topic,
            stage: stage.into(),
        }
    }
}

/// Verifies upstream topics exist.
#[derive(Debug, Clone, Default)]
pub struct StartupGate {
    requirements: Vec<UpstreamRequirement>,
}

impl StartupGate {
    /// Gate over explicit requirements.
    #[must_use]
    pub const fn new(requirements: Vec<UpstreamRequirement>) -> Self {
        Self { requirements }
    }

    /// Requirements of the status service: the turnstile summary from the
    /// aggregation engine and the reduced topology from the stream
    /// transformer.
    #[must_use]
    pub fn for_catalog(catalog: &TopicCatalog) -> Self {
        Self::new(vec![
            UpstreamRequirement::new(
                catalog.turnstile_summary.clone(),
                "the turnstile summary aggregation",
            ),
            UpstreamRequirement::new(
                catalog.reduced_stations.clone(),
                "the station stream transformer",
            ),
        ])
    }

    /// Check every requirement against the broker's topic list.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::MissingUpstream`] for the first missing topic.
    pub async fn verify(&self, admin: &dyn BrokerAdminPort) -> Result<(), StartupError> {
        let topics = admin.list_topics().await?;
        for requirement in &self.requirements {
            if !topics.contains(requirement.topic.as_str()) {
                tracing::error!(
                    topic = %requirement.topic,
                    stage = %requirement.stage,
                    "Upstream topic missing"
                );
                return Err(StartupError::MissingUpstream {
                    topic: requirement.topic.clone(),
                    stage: requirement.stage.clone(),
                });
            }
        }
        tracing::info!(checked = self.requirements.len(), "Upstream topics present");
        Ok(())
    }
}

// =============================================================================
// Summary Table Bootstrap
// =============================================================================

/// Statement defining the turnstile table and its per-station summary.
#[must_use]
pub fn summary_table_statement(catalog: &TopicCatalog) -> String {
    format!(
        "CREATE TABLE turnstile (\n    \
             station_id BIGINT,\n    \
             station_name VARCHAR,\n    \
             line VARCHAR\n\
         ) WITH (\n    \
             KAFKA_TOPIC='{turnstiles}',\n    \
             VALUE_FORMAT='AVRO',\n    \
             KEY='station_id'\n\
         );\n\
         \n\
         CREATE TABLE {summary}\n\
         WITH (\n    \
             KAFKA_TOPIC='{summary}',\n    \
             VALUE_FORMAT='JSON'\n\
         ) AS\n    \
             SELECT station_id, COUNT(*) AS count FROM turnstile GROUP BY station_id;\n",
        turnstiles = catalog.turnstiles,
        summary = catalog.turnstile_summary,
    )
}

/// Submits the summary aggregation once.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryTableBootstrap;

impl SummaryTableBootstrap {
    /// Submit the statement unless the summary topic already exists.
    ///
    /// Returns whether the statement was submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic list cannot be read or the engine
    /// rejects the statement.
    pub async fn ensure(
        admin: &dyn BrokerAdminPort,
        engine: &dyn AggregationEnginePort,
        catalog: &TopicCatalog,
    ) -> Result<bool, StartupError> {
        if admin.topic_exists(catalog.turnstile_summary.as_str()).await? {
            tracing::info!(topic = %catalog.turnstile_summary, "Summary topic exists, skipping statement");
            return Ok(false);
        }

        tracing::debug!(topic = %catalog.turnstile_summary, "Submitting summary table statement");
        engine
            .submit_statement(&summary_table_statement(catalog))
            .await?;
        tracing::info!(topic = %catalog.turnstile_summary, "Summary table statement submitted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::topic::TopicSpec;
    use crate::infrastructure::memory::InMemoryBroker;

    #[derive(Default)]
    struct RecordingEngine {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AggregationEnginePort for RecordingEngine {
        async fn submit_statement(&self, statement: &str) -> Result<(), BrokerError> {
            self.statements.lock().push(statement.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn gate_names_the_missing_stage() {
        let broker = InMemoryBroker::new();
        let catalog = TopicCatalog::default();
        broker.create_topic_now(&TopicSpec::new(catalog.turnstile_summary.clone(), 1, 1));

        let err = StartupGate::for_catalog(&catalog)
            .verify(&broker)
            .await
            .unwrap_err();
        match err {
            StartupError::MissingUpstream { topic, stage } => {
                assert_eq!(topic, catalog.reduced_stations);
                assert_eq!(stage, "the station stream transformer");
            }
            StartupError::Broker(e) => panic!("unexpected broker error {e}"),
        }
    }

    #[tokio::test]
    async fn gate_passes_when_all_topics_exist() {
        let broker = InMemoryBroker::new();
        let catalog = TopicCatalog::default();
        for topic in [&catalog.turnstile_summary, &catalog.reduced_stations] {
            broker.create_topic_now(&TopicSpec::new(topic.clone(), 1, 1));
        }

        assert!(StartupGate::for_catalog(&catalog).verify(&broker).await.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_submits_only_when_summary_missing() {
        let broker = Arc::new(InMemoryBroker::new());
        let engine = RecordingEngine::default();
        let catalog = TopicCatalog::default();

        assert!(
            SummaryTableBootstrap::ensure(broker.as_ref(), &engine, &catalog)
                .await
                .unwrap()
        );
        broker.create_topic_now(&TopicSpec::new(catalog.turnstile_summary.clone(), 1, 1));
        assert!(
            !SummaryTableBootstrap::ensure(broker.as_ref(), &engine, &catalog)
                .await
                .unwrap()
        );

        let statements = engine.statements.lock();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("KAFKA_TOPIC='org.transit.turnstiles'"));
        assert!(statements[0].contains("CREATE TABLE TURNSTILE_SUMMARY"));
    }
}
