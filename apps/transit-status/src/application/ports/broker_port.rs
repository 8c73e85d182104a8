//! Broker Ports (Driven Ports)
//!
//! Interfaces to the streaming broker: topic administration, the producer
//! data plane and the consumer data plane. Adapters live under
//! `infrastructure::memory` and `infrastructure::rest_proxy`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::topic::{TopicName, TopicPattern, TopicSpec};

// =============================================================================
// Errors
// =============================================================================

/// Broker client error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Broker unreachable or the request failed in transit.
    #[error("Broker transport error: {message}")]
    Transport {
        /// Error detail.
        message: String,
    },

    /// A frame returned by the broker could not be decoded.
    #[error("Broker decode error: {message}")]
    Decode {
        /// Error detail.
        message: String,
    },

    /// Topic creation raced with an existing topic.
    #[error("Topic already exists: {topic}")]
    TopicAlreadyExists {
        /// Topic name.
        topic: String,
    },

    /// The broker refused the request.
    #[error("Broker rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
        /// Error detail.
        message: String,
    },

    /// The client handle has been closed.
    #[error("Broker client closed")]
    Closed,
}

impl BrokerError {
    /// Build a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: cause.to_string(),
        }
    }

    /// Build a decode error from any displayable cause.
    pub fn decode(cause: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: cause.to_string(),
        }
    }

    /// Whether the next attempt may succeed without intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Decode { .. })
    }
}

// =============================================================================
// Records
// =============================================================================

/// Result of a create-topic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTopicOutcome {
    /// The topic was created by this request.
    Created,
    /// The topic was already present.
    AlreadyExists,
}

/// A record handed to the producer data plane.
///
/// `producer_id` and `sequence` identify the send so that a broker-side
/// retry of the same record is deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Destination topic.
    pub topic: TopicName,
    /// Encoded key.
    pub key: Option<Vec<u8>>,
    /// Encoded value.
    pub value: Vec<u8>,
    /// Identity of the sending producer.
    pub producer_id: String,
    /// Per-producer sequence number, strictly increasing.
    pub sequence: u64,
}

/// Sequence numbers each producer keeps in a [`SequenceWindow`].
pub const SEQUENCE_WINDOW: usize = 1024;

/// Recently seen `(producer_id, sequence)` pairs.
///
/// Only an exact repeat is a resend. A sequence arriving after a higher one
/// is still a distinct record.
#[derive(Debug, Default)]
pub struct SequenceWindow {
    seen: HashMap<String, BTreeSet<u64>>,
}

impl SequenceWindow {
    /// Remember `sequence` for `producer_id`. Returns `false` for a resend.
    pub fn admit(&mut self, producer_id: &str, sequence: u64) -> bool {
        let seen = match self.seen.get_mut(producer_id) {
            Some(seen) => seen,
            None => self.seen.entry(producer_id.to_string()).or_default(),
        };
        if !seen.insert(sequence) {
            return false;
        }
        if seen.len() > SEQUENCE_WINDOW {
            seen.pop_first();
        }
        true
    }
}

/// A record returned by a consumer poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecord {
    /// Source topic.
    pub topic: String,
    /// Raw key bytes.
    pub key: Option<Vec<u8>>,
    /// Raw value bytes.
    pub value: Vec<u8>,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Where a newly assigned partition starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartOffset {
    /// The group's committed position, or the log end if none.
    #[default]
    Committed,
    /// The earliest retained offset.
    Beginning,
    /// The log end.
    End,
}

/// One partition handed to a consumer by a rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
    /// Start position, adjustable from [`RebalanceListener::on_assign`].
    pub start: StartOffset,
}

impl PartitionAssignment {
    /// Assignment starting at the committed position.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            start: StartOffset::Committed,
        }
    }
}

// =============================================================================
// Rebalance Callbacks
// =============================================================================

/// Callback invoked by a consumer adapter when partitions change hands.
///
/// `on_assign` runs before the first fetch from the assigned partitions, so
/// start positions set here apply to every record on them.
pub trait RebalanceListener: Send + Sync {
    /// Newly assigned partitions.
    fn on_assign(&self, assignments: &mut [PartitionAssignment]);

    /// Partitions taken away.
    fn on_revoke(&self, _revoked: &[PartitionAssignment]) {}
}

/// Leaves every assignment at its committed position.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepCommitted;

impl RebalanceListener for KeepCommitted {
    fn on_assign(&self, _assignments: &mut [PartitionAssignment]) {}
}

/// Rewinds every newly assigned partition to the earliest retained offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetToEarliest;

impl RebalanceListener for ResetToEarliest {
    fn on_assign(&self, assignments: &mut [PartitionAssignment]) {
        for assignment in assignments.iter_mut() {
            assignment.start = StartOffset::Beginning;
        }
        tracing::debug!(partitions = assignments.len(), "Reset assignment to earliest");
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Topic administration.
#[async_trait]
pub trait BrokerAdminPort: Send + Sync {
    /// Create a topic with the given shape.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateTopicOutcome, BrokerError>;

    /// Names of all topics known to the broker.
    async fn list_topics(&self) -> Result<BTreeSet<String>, BrokerError>;

    /// Whether a topic exists.
    async fn topic_exists(&self, topic: &str) -> Result<bool, BrokerError> {
        Ok(self.list_topics().await?.contains(topic))
    }
}

/// Producer data plane.
#[async_trait]
pub trait ProducerPort: Send + Sync {
    /// Enqueue a record for delivery. Returns once the record is accepted
    /// by the client, not when the broker acknowledges it.
    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for queued records to be delivered.
    ///
    /// Returns the number of records still in flight when the wait ended.
    async fn flush(&self, timeout: Duration) -> Result<usize, BrokerError>;
}

/// Consumer data plane. One instance serves one subscription.
#[async_trait]
pub trait ConsumerPort: Send {
    /// Register interest in every topic matching `pattern`.
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), BrokerError>;

    /// Receive at most one record, waiting up to `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<DeliveredRecord>, BrokerError>;

    /// Unassign, unsubscribe and release the client. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Creates consumer handles bound to a consumer group.
pub trait ConsumerFactory: Send + Sync {
    /// New consumer in `group_id`.
    fn consumer(&self, group_id: &str) -> Box<dyn ConsumerPort>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_to_earliest_rewinds_every_assignment() {
        let mut assignments = vec![
            PartitionAssignment::new("org.transit.arrivals", 0),
            PartitionAssignment::new("org.transit.arrivals", 1),
        ];
        ResetToEarliest.on_assign(&mut assignments);
        assert!(
            assignments
                .iter()
                .all(|a| a.start == StartOffset::Beginning)
        );
    }

    #[test]
    fn keep_committed_leaves_assignments_alone() {
        let mut assignments = vec![PartitionAssignment::new("t", 0)];
        KeepCommitted.on_assign(&mut assignments);
        assert_eq!(assignments[0].start, StartOffset::Committed);
    }

    #[test]
    fn sequence_window_rejects_only_exact_repeats() {
        let mut window = SequenceWindow::default();
        assert!(window.admit("p", 1));
        assert!(window.admit("p", 0));
        assert!(!window.admit("p", 1));
        assert!(!window.admit("p", 0));
        assert!(window.admit("q", 1));
    }

    #[test]
    fn sequence_window_forgets_the_oldest() {
        let mut window = SequenceWindow::default();
        for sequence in 0..=SEQUENCE_WINDOW as u64 {
            assert!(window.admit("p", sequence));
        }
        assert!(window.admit("p", 0));
        assert!(!window.admit("p", SEQUENCE_WINDOW as u64));
    }

    #[test]
    fn transient_classification() {
        assert!(BrokerError::transport("connection refused").is_transient());
        assert!(BrokerError::decode("bad frame").is_transient());
        assert!(!BrokerError::Closed.is_transient());
        assert!(
            !BrokerError::Rejected {
                status: 403,
                message: "denied".to_string()
            }
            .is_transient()
        );
    }
}
