//! Subscription Consumer
//!
//! Owns one subscription and runs its poll/dispatch loop.
//!
//! # State Machine
//!
//! ```text
//! Created --subscribe--> Subscribed --> Polling <--> Idle
//!                                          |          |
//!                                          +--cancel--+--> Closed
//! ```
//!
//! While records keep arriving the loop stays in `Polling` and drains them
//! back to back. An empty poll, a transport error or an undecodable frame
//! moves it to `Idle` for `poll_interval`. Cancellation is observed only
//! while waiting on the broker or sleeping, never during a dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BrokerError, ConsumerFactory, ConsumerPort, DeliveredRecord, KeepCommitted, RebalanceListener,
    ResetToEarliest,
};
use crate::domain::topic::TopicPattern;
use crate::infrastructure::codec::SchemaGovernedCodec;
use crate::infrastructure::metrics;

/// Default back-off after an empty poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bounded wait for a single receive.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

// =============================================================================
// Handler
// =============================================================================

/// Receives every record delivered to a subscription.
///
/// Calls for one subscription never overlap.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Handle one delivered record.
    async fn handle(&self, record: DeliveredRecord);
}

/// Adapts a synchronous closure into a [`RecordHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> RecordHandler for FnHandler<F>
where
    F: Fn(DeliveredRecord) + Send + Sync,
{
    async fn handle(&self, record: DeliveredRecord) {
        (self.0)(record);
    }
}

// =============================================================================
// Subscription Spec
// =============================================================================

/// Static configuration of one subscription.
#[derive(Clone)]
pub struct SubscriptionSpec {
    /// Topic or pattern to subscribe to.
    pub pattern: TopicPattern,
    /// Handler invoked per record.
    pub handler: Arc<dyn RecordHandler>,
    /// Whether records are schema-governed envelopes.
    pub structured: bool,
    /// Rewind newly assigned partitions to the earliest offset.
    pub reset_to_earliest: bool,
    /// Back-off after an empty poll.
    pub poll_interval: Duration,
    /// Bounded wait for a single receive.
    pub poll_timeout: Duration,
}

impl SubscriptionSpec {
    /// Structured subscription reading from the earliest offset.
    pub fn new(pattern: TopicPattern, handler: Arc<dyn RecordHandler>) -> Self {
        Self {
            pattern,
            handler,
            structured: true,
            reset_to_earliest: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Set whether records are schema-governed.
    #[must_use]
    pub fn structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    /// Set whether to rewind to the earliest offset on assignment.
    #[must_use]
    pub fn reset_to_earliest(mut self, reset: bool) -> Self {
        self.reset_to_earliest = reset;
        self
    }

    /// Set the poll cadence.
    #[must_use]
    pub fn with_timing(mut self, poll_interval: Duration, poll_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.poll_timeout = poll_timeout;
        self
    }

    fn listener(&self) -> Arc<dyn RebalanceListener> {
        if self.reset_to_earliest {
            Arc::new(ResetToEarliest)
        } else {
            Arc::new(KeepCommitted)
        }
    }
}

impl std::fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("pattern", &self.pattern.as_str())
            .field("structured", &self.structured)
            .field("reset_to_earliest", &self.reset_to_earliest)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of a subscription consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// Constructed, not yet subscribed.
    Created,
    /// Subscription registered.
    Subscribed,
    /// Receiving and dispatching.
    Polling,
    /// Backing off after an empty poll.
    Idle,
    /// Released.
    Closed,
}

/// Live state and counters of one consumer, shared with the status surface.
#[derive(Debug)]
pub struct ConsumerStatus {
    pattern: String,
    state: RwLock<ConsumerState>,
    delivered: AtomicU64,
    empty_polls: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of a [`ConsumerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStatusSnapshot {
    /// Subscribed topic or pattern.
    pub pattern: String,
    /// Current state.
    pub state: ConsumerState,
    /// Records handed to the handler.
    pub delivered: u64,
    /// Polls that returned nothing.
    pub empty_polls: u64,
    /// Transport and envelope errors.
    pub errors: u64,
}

impl ConsumerStatus {
    fn new(pattern: &TopicPattern) -> Self {
        Self {
            pattern: pattern.as_str().to_string(),
            state: RwLock::new(ConsumerState::Created),
            delivered: AtomicU64::new(0),
            empty_polls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Subscribed topic or pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.read()
    }

    fn set_state(&self, state: ConsumerState) {
        *self.state.write() = state;
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> ConsumerStatusSnapshot {
        ConsumerStatusSnapshot {
            pattern: self.pattern.clone(),
            state: self.state(),
            delivered: self.delivered.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// One subscription and its poll/dispatch loop.
pub struct SubscriptionConsumer {
    spec: SubscriptionSpec,
    consumer: Box<dyn ConsumerPort>,
    codec: SchemaGovernedCodec,
    status: Arc<ConsumerStatus>,
}

impl SubscriptionConsumer {
    /// Wrap a consumer handle.
    pub fn new(
        spec: SubscriptionSpec,
        consumer: Box<dyn ConsumerPort>,
        codec: SchemaGovernedCodec,
    ) -> Self {
        let status = Arc::new(ConsumerStatus::new(&spec.pattern));
        Self {
            spec,
            consumer,
            codec,
            status,
        }
    }

    /// Create a consumer in the group derived from the subscription pattern.
    pub fn from_factory(
        spec: SubscriptionSpec,
        factory: &dyn ConsumerFactory,
        codec: SchemaGovernedCodec,
    ) -> Self {
        let consumer = factory.consumer(&spec.pattern.group_id());
        Self::new(spec, consumer, codec)
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<ConsumerStatus> {
        Arc::clone(&self.status)
    }

    /// Subscription configuration.
    #[must_use]
    pub const fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Register the subscription.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error if the subscription is refused.
    pub async fn subscribe(&mut self) -> Result<(), BrokerError> {
        self.consumer
            .subscribe(&self.spec.pattern, self.spec.listener())
            .await?;
        self.status.set_state(ConsumerState::Subscribed);
        tracing::info!(
            pattern = %self.spec.pattern,
            group_id = %self.spec.pattern.group_id(),
            reset_to_earliest = self.spec.reset_to_earliest,
            "Subscribed"
        );
        Ok(())
    }

    /// Attempt one bounded receive.
    ///
    /// Errors and undecodable frames are logged and reported as `None`.
    async fn receive(&mut self) -> Option<DeliveredRecord> {
        match self.consumer.poll(self.spec.poll_timeout).await {
            Ok(Some(record)) => {
                if self.spec.structured
                    && let Err(e) = self.codec.inspect_envelope(&record.value)
                {
                    tracing::error!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Undecodable record, skipping"
                    );
                    self.status.errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_poll_error(&record.topic);
                    return None;
                }
                Some(record)
            }
            Ok(None) => {
                self.status.empty_polls.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(pattern = %self.spec.pattern, error = %e, "Poll failed");
                self.status.errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_poll_error(self.spec.pattern.as_str());
                None
            }
        }
    }

    /// Hand one record to the handler.
    ///
    /// Takes `&mut self` so the loop future only needs the consumer adapter
    /// to be `Send`.
    async fn dispatch(&mut self, record: DeliveredRecord) {
        self.status.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::record_received(&record.topic);
        self.spec.handler.handle(record).await;
    }

    /// Receive at most one record and dispatch it.
    ///
    /// Returns whether a record was handled.
    pub async fn poll_once(&mut self) -> bool {
        match self.receive().await {
            Some(record) => {
                self.dispatch(record).await;
                true
            }
            None => false,
        }
    }

    /// Subscribe and run until `cancel` fires, then close.
    ///
    /// # Errors
    ///
    /// Returns an error only if the subscription is refused. Per-record and
    /// per-poll failures never end the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        if let Err(e) = self.subscribe().await {
            self.close().await;
            return Err(e);
        }

        loop {
            self.status.set_state(ConsumerState::Polling);
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.receive() => received,
            };

            if let Some(record) = received {
                self.dispatch(record).await;
                continue;
            }

            self.status.set_state(ConsumerState::Idle);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.spec.poll_interval) => {}
            }
        }

        self.close().await;
        Ok(())
    }

    /// Unassign, unsubscribe and release the client. Idempotent.
    pub async fn close(&mut self) {
        if self.status.state() == ConsumerState::Closed {
            return;
        }
        if let Err(e) = self.consumer.close().await {
            tracing::warn!(pattern = %self.spec.pattern, error = %e, "Consumer close failed");
        }
        self.status.set_state(ConsumerState::Closed);
        tracing::info!(pattern = %self.spec.pattern, "Consumer closed");
    }
}

impl Drop for SubscriptionConsumer {
    /// A consumer dropped mid-run (its task was aborted) still releases the
    /// broker-side client, in the background.
    fn drop(&mut self) {
        if matches!(
            self.status.state(),
            ConsumerState::Created | ConsumerState::Closed
        ) {
            return;
        }
        self.status.set_state(ConsumerState::Closed);
        let pattern = self.spec.pattern.to_string();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%pattern, "Consumer dropped outside a runtime without closing");
            return;
        };
        let mut consumer = std::mem::replace(&mut self.consumer, Box::new(Released));
        tracing::warn!(%pattern, "Consumer dropped while running, closing in background");
        handle.spawn(async move {
            if let Err(e) = consumer.close().await {
                tracing::warn!(%pattern, error = %e, "Background consumer close failed");
            }
        });
    }
}

/// Stands in for a consumer handle that has been handed off for closing.
struct Released;

#[async_trait]
impl ConsumerPort for Released {
    async fn subscribe(
        &mut self,
        _pattern: &TopicPattern,
        _listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), BrokerError> {
        Err(BrokerError::Closed)
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Option<DeliveredRecord>, BrokerError> {
        Err(BrokerError::Closed)
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}

impl std::fmt::Debug for SubscriptionConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionConsumer")
            .field("spec", &self.spec)
            .field("state", &self.status.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{OutboundRecord, ProducerPort};
    use crate::domain::records::{WeatherEvent, WeatherReadings};
    use crate::domain::topic::TopicSpec;
    use crate::infrastructure::memory::InMemoryBroker;

    fn collector() -> (Arc<Mutex<Vec<DeliveredRecord>>>, Arc<dyn RecordHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = FnHandler(move |record: DeliveredRecord| sink.lock().push(record));
        (seen, Arc::new(handler))
    }

    async fn send_raw(broker: &InMemoryBroker, topic: &str, value: &[u8], sequence: u64) {
        broker
            .send(OutboundRecord {
                topic: topic.into(),
                key: None,
                value: value.to_vec(),
                producer_id: "test".to_string(),
                sequence,
            })
            .await
            .unwrap();
    }

    fn codec() -> SchemaGovernedCodec {
        SchemaGovernedCodec::builtin().unwrap()
    }

    #[tokio::test]
    async fn reset_to_earliest_sees_records_published_before_start() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("raw", 1, 1));
        send_raw(&broker, "raw", b"one", 0).await;
        send_raw(&broker, "raw", b"two", 1).await;

        let (seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("raw").unwrap(), handler)
            .structured(false);
        let mut consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());
        consumer.subscribe().await.unwrap();

        while consumer.poll_once().await {}

        let values: Vec<_> = seen.lock().iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![b"one".to_vec(), b"two".to_vec()]);
        consumer.close().await;
    }

    #[tokio::test]
    async fn without_reset_only_new_records_arrive() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("raw", 1, 1));
        send_raw(&broker, "raw", b"old", 0).await;

        let (seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("raw").unwrap(), handler)
            .structured(false)
            .reset_to_earliest(false);
        let mut consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());
        consumer.subscribe().await.unwrap();
        assert!(!consumer.poll_once().await);

        send_raw(&broker, "raw", b"new", 1).await;
        assert!(consumer.poll_once().await);
        assert_eq!(seen.lock()[0].value, b"new".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_loop_executes_on_a_spawned_task() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("raw", 1, 1));
        send_raw(&broker, "raw", b"spawned", 0).await;

        let (seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("raw").unwrap(), handler)
            .structured(false)
            .with_timing(Duration::from_millis(5), Duration::from_millis(5));
        let consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());
        let status = consumer.status();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(status.state(), ConsumerState::Closed);
        assert_eq!(seen.lock()[0].value, b"spawned".to_vec());
    }

    #[tokio::test]
    async fn structured_consumer_skips_non_envelopes() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("weather", 1, 1));
        let codec = codec();
        send_raw(&broker, "weather", b"{\"not\":\"an envelope\"}", 0).await;
        let good = codec
            .encode_value::<WeatherReadings>(&WeatherEvent {
                temperature: 20.0,
                status: "windy".to_string(),
            })
            .unwrap();
        send_raw(&broker, "weather", &good, 1).await;

        let (seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("weather").unwrap(), handler);
        let mut consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec.clone());
        consumer.subscribe().await.unwrap();

        assert!(!consumer.poll_once().await);
        assert!(consumer.poll_once().await);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(consumer.status().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn transient_poll_error_does_not_end_the_loop() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("raw", 1, 1));
        send_raw(&broker, "raw", b"after-fault", 0).await;
        broker.inject_poll_faults(2);

        let (seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("raw").unwrap(), handler)
            .structured(false)
            .with_timing(Duration::from_millis(5), Duration::from_millis(5));
        let consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());
        let status = consumer.status();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap().unwrap();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.state, ConsumerState::Closed);
    }

    #[tokio::test]
    async fn cancel_interrupts_idle_sleep() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_topic_now(&TopicSpec::new("quiet", 1, 1));

        let (_seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("quiet").unwrap(), handler)
            .with_timing(Duration::from_secs(3600), Duration::from_millis(10));
        let consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn close_twice_is_a_no_op() {
        let broker = Arc::new(InMemoryBroker::new());
        let (_seen, handler) = collector();
        let spec = SubscriptionSpec::new(TopicPattern::parse("t").unwrap(), handler);
        let mut consumer = SubscriptionConsumer::from_factory(spec, broker.as_ref(), codec());

        consumer.subscribe().await.unwrap();
        consumer.close().await;
        consumer.close().await;
        assert_eq!(consumer.status().state(), ConsumerState::Closed);
    }
}
