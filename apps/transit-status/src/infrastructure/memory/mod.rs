//! In-memory broker for testing and local runs.
//!
//! Implements the admin, producer and consumer ports over partitioned,
//! append-only logs held in process. Suitable for testing and development.
//! Not for production use.
//!
//! Semantics follow the real broker where the pipeline depends on them:
//!
//! - Creating an existing topic reports `AlreadyExists`.
//! - Sends are deduplicated by producer id and sequence number.
//! - Consumers in one group split partitions; a partition is owned by the
//!   first consumer that discovers it.
//! - Without a committed position, a new assignment starts at the log end
//!   unless the rebalance listener rewinds it.
//! - Delivered positions are committed automatically.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::{
    BrokerAdminPort, BrokerError, ConsumerFactory, ConsumerPort, CreateTopicOutcome,
    DeliveredRecord, OutboundRecord, PartitionAssignment, ProducerPort, RebalanceListener,
    SequenceWindow, StartOffset,
};
use crate::domain::topic::{TopicPattern, TopicSpec};

type PartitionKey = (String, i32);
type GroupPartitionKey = (String, String, i32);

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Vec<u8>,
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Vec<StoredRecord>>,
    next_partition: usize,
}

impl Topic {
    fn new(partitions: i32) -> Self {
        let count = usize::try_from(partitions.max(1)).unwrap_or(1);
        Self {
            partitions: vec![Vec::new(); count],
            next_partition: 0,
        }
    }

    fn partition_for(&mut self, key: Option<&[u8]>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % count as u64).unwrap_or(0)
            }
            None => {
                let partition = self.next_partition % count;
                self.next_partition = self.next_partition.wrapping_add(1);
                partition
            }
        }
    }

    fn len(&self, partition: i32) -> i64 {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get(p))
            .map_or(0, |log| i64::try_from(log.len()).unwrap_or(i64::MAX))
    }

    fn get(&self, partition: i32, offset: i64) -> Option<&StoredRecord> {
        let partition = usize::try_from(partition).ok()?;
        let offset = usize::try_from(offset).ok()?;
        self.partitions.get(partition)?.get(offset)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Topic>,
    producer_sequences: SequenceWindow,
    committed: HashMap<GroupPartitionKey, i64>,
    owners: HashMap<GroupPartitionKey, u64>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    appended: Notify,
    create_calls: AtomicUsize,
    poll_faults: AtomicUsize,
    next_consumer_id: AtomicU64,
}

impl Shared {
    fn release(&self, consumer_id: u64) {
        self.state.lock().owners.retain(|_, owner| *owner != consumer_id);
    }
}

// =============================================================================
// Broker
// =============================================================================

/// In-process broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic without going through the admin port (test setup).
    pub fn create_topic_now(&self, spec: &TopicSpec) {
        self.shared
            .state
            .lock()
            .topics
            .entry(spec.name.to_string())
            .or_insert_with(|| Topic::new(spec.partitions));
    }

    /// Number of create-topic requests received through the admin port.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.shared.create_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` consumer polls fail with a transport error.
    pub fn inject_poll_faults(&self, count: usize) {
        self.shared.poll_faults.store(count, Ordering::SeqCst);
    }

    /// Values stored on a topic, in partition then offset order.
    #[must_use]
    pub fn values(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared
            .state
            .lock()
            .topics
            .get(topic)
            .map(|t| {
                t.partitions
                    .iter()
                    .flatten()
                    .map(|r| r.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerAdminPort for InMemoryBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateTopicOutcome, BrokerError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.state.lock();
        if state.topics.contains_key(spec.name.as_str()) {
            return Ok(CreateTopicOutcome::AlreadyExists);
        }
        state
            .topics
            .insert(spec.name.to_string(), Topic::new(spec.partitions));
        Ok(CreateTopicOutcome::Created)
    }

    async fn list_topics(&self) -> Result<BTreeSet<String>, BrokerError> {
        Ok(self.shared.state.lock().topics.keys().cloned().collect())
    }
}

#[async_trait]
impl ProducerPort for InMemoryBroker {
    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock();
            if !state
                .producer_sequences
                .admit(&record.producer_id, record.sequence)
            {
                tracing::debug!(
                    producer_id = %record.producer_id,
                    sequence = record.sequence,
                    "Discarding duplicate send"
                );
                return Ok(());
            }

            let topic = state
                .topics
                .entry(record.topic.to_string())
                .or_insert_with(|| Topic::new(1));
            let partition = topic.partition_for(record.key.as_deref());
            topic.partitions[partition].push(StoredRecord {
                key: record.key,
                value: record.value,
            });
        }
        self.shared.appended.notify_waiters();
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<usize, BrokerError> {
        Ok(0)
    }
}

impl ConsumerFactory for InMemoryBroker {
    fn consumer(&self, group_id: &str) -> Box<dyn ConsumerPort> {
        Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            id: self.shared.next_consumer_id.fetch_add(1, Ordering::Relaxed),
            group_id: group_id.to_string(),
            subscription: None,
            assigned: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            closed: false,
        })
    }
}

// =============================================================================
// Consumer
// =============================================================================

struct Subscription {
    pattern: TopicPattern,
    listener: Arc<dyn RebalanceListener>,
}

/// Consumer handle bound to one group.
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    id: u64,
    group_id: String,
    subscription: Option<Subscription>,
    assigned: Vec<PartitionAssignment>,
    positions: HashMap<PartitionKey, i64>,
    cursor: usize,
    closed: bool,
}

impl InMemoryConsumer {
    /// Claim partitions of matching topics not yet owned in the group.
    fn discover(&mut self) {
        let Some(subscription) = &self.subscription else {
            return;
        };

        let mut batch = Vec::new();
        {
            let mut state = self.shared.state.lock();
            let BrokerState { topics, owners, .. } = &mut *state;
            for (name, topic) in topics.iter() {
                if !subscription.pattern.matches(name) {
                    continue;
                }
                for partition in 0..topic.partitions.len() {
                    let partition = i32::try_from(partition).unwrap_or(i32::MAX);
                    let key = (self.group_id.clone(), name.clone(), partition);
                    if let std::collections::hash_map::Entry::Vacant(entry) = owners.entry(key) {
                        entry.insert(self.id);
                        batch.push(PartitionAssignment::new(name.clone(), partition));
                    }
                }
            }
        }
        if batch.is_empty() {
            return;
        }

        subscription.listener.on_assign(&mut batch);

        let state = self.shared.state.lock();
        for assignment in &batch {
            let end = state
                .topics
                .get(&assignment.topic)
                .map_or(0, |t| t.len(assignment.partition));
            let committed = state.committed.get(&(
                self.group_id.clone(),
                assignment.topic.clone(),
                assignment.partition,
            ));
            let position = match assignment.start {
                StartOffset::Beginning => 0,
                StartOffset::End => end,
                StartOffset::Committed => committed.copied().unwrap_or(end),
            };
            self.positions
                .insert((assignment.topic.clone(), assignment.partition), position);
        }
        drop(state);

        tracing::debug!(
            group_id = %self.group_id,
            partitions = batch.len(),
            "Partitions assigned"
        );
        self.assigned.extend(batch);
    }

    /// Take the next record from any assigned partition, round robin.
    fn fetch(&mut self) -> Option<DeliveredRecord> {
        if self.assigned.is_empty() {
            return None;
        }
        let mut state = self.shared.state.lock();
        let count = self.assigned.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let assignment = &self.assigned[index];
            let key = (assignment.topic.clone(), assignment.partition);
            let position = self.positions.get(&key).copied().unwrap_or(0);

            let Some(record) = state
                .topics
                .get(&assignment.topic)
                .and_then(|t| t.get(assignment.partition, position))
                .cloned()
            else {
                continue;
            };

            self.positions.insert(key, position + 1);
            state.committed.insert(
                (
                    self.group_id.clone(),
                    assignment.topic.clone(),
                    assignment.partition,
                ),
                position + 1,
            );
            self.cursor = index + 1;
            return Some(DeliveredRecord {
                topic: assignment.topic.clone(),
                key: record.key,
                value: record.value,
                partition: assignment.partition,
                offset: position,
            });
        }
        None
    }

    fn take_fault(&self) -> bool {
        self.shared
            .poll_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ConsumerPort for InMemoryConsumer {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        self.subscription = Some(Subscription {
            pattern: pattern.clone(),
            listener,
        });
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<DeliveredRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if self.subscription.is_none() {
            return Err(BrokerError::Rejected {
                status: 409,
                message: "consumer is not subscribed".to_string(),
            });
        }
        if self.take_fault() {
            return Err(BrokerError::transport("injected fault"));
        }

        let shared = Arc::clone(&self.shared);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = shared.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.discover();
            if let Some(record) = self.fetch() {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.release(self.id);
        if let Some(subscription) = self.subscription.take() {
            subscription.listener.on_revoke(&self.assigned);
        }
        self.assigned.clear();
        self.positions.clear();
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.release(self.id);
        }
    }
}

impl std::fmt::Debug for InMemoryConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryConsumer")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("assigned", &self.assigned.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
