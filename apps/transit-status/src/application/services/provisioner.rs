//! Topic Provisioning Service
//!
//! Makes sure each output topic exists before anything is published to it,
//! issuing at most one create request per topic per process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::application::ports::{BrokerAdminPort, BrokerError, CreateTopicOutcome};
use crate::domain::topic::{TopicName, TopicSpec};
use crate::infrastructure::metrics;

/// Provisioning errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// The broker refused to create the topic.
    #[error("failed to create topic {topic}: {source}")]
    Create {
        /// Topic name.
        topic: TopicName,
        /// Underlying broker error.
        #[source]
        source: BrokerError,
    },
}

/// Topics already confirmed to exist.
///
/// Each topic maps to a cell that is filled once the topic is confirmed.
/// Concurrent callers for the same topic share the cell, so only one of
/// them talks to the broker. A failed attempt leaves the cell empty.
#[derive(Debug, Default)]
pub struct ProvisionedTopicSet {
    cells: Mutex<HashMap<TopicName, Arc<OnceCell<()>>>>,
}

impl ProvisionedTopicSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, topic: &TopicName) -> Arc<OnceCell<()>> {
        Arc::clone(self.cells.lock().entry(topic.clone()).or_default())
    }

    /// Whether the topic has been confirmed.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.cells
            .lock()
            .get(topic)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of confirmed topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Whether no topic has been confirmed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ensures topics exist, once per topic per process.
pub struct TopicProvisioner {
    admin: Arc<dyn BrokerAdminPort>,
    provisioned: Arc<ProvisionedTopicSet>,
}

impl TopicProvisioner {
    /// Create a provisioner with its own empty set.
    #[must_use]
    pub fn new(admin: Arc<dyn BrokerAdminPort>) -> Self {
        Self::with_set(admin, Arc::new(ProvisionedTopicSet::new()))
    }

    /// Create a provisioner over an existing set.
    #[must_use]
    pub const fn with_set(
        admin: Arc<dyn BrokerAdminPort>,
        provisioned: Arc<ProvisionedTopicSet>,
    ) -> Self {
        Self { admin, provisioned }
    }

    /// Topics confirmed so far.
    #[must_use]
    pub fn provisioned(&self) -> &ProvisionedTopicSet {
        &self.provisioned
    }

    /// Make sure `spec.name` exists.
    ///
    /// A topic that already exists at the broker counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Create`] for any other creation failure.
    pub async fn ensure(&self, spec: &TopicSpec) -> Result<(), ProvisionError> {
        let cell = self.provisioned.cell(&spec.name);
        cell.get_or_try_init(|| self.create(spec)).await?;
        Ok(())
    }

    async fn create(&self, spec: &TopicSpec) -> Result<(), ProvisionError> {
        match self.admin.create_topic(spec).await {
            Ok(CreateTopicOutcome::Created) => {
                metrics::record_topic_created();
                tracing::info!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    "Created topic"
                );
                Ok(())
            }
            Ok(CreateTopicOutcome::AlreadyExists) | Err(BrokerError::TopicAlreadyExists { .. }) => {
                tracing::debug!(topic = %spec.name, "Topic already exists");
                Ok(())
            }
            Err(source) => {
                tracing::error!(topic = %spec.name, error = %source, "Topic creation failed");
                Err(ProvisionError::Create {
                    topic: spec.name.clone(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for TopicProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicProvisioner")
            .field("provisioned", &self.provisioned.len())
            .finish_non_exhaustive()
    }
}
