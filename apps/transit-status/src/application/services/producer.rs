//! Event Producers
//!
//! [`EventProducer`] publishes schema-governed records to one bound topic.
//! [`JsonEventProducer`] does the same for plain JSON records. Both
//! provision their topic at construction and tag every send with a producer
//! id and sequence number so broker-side retries are deduplicated.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use super::provisioner::{ProvisionError, TopicProvisioner};
use crate::application::ports::{BrokerError, OutboundRecord, ProducerPort};
use crate::domain::records::SchemaGoverned;
use crate::domain::topic::{TopicName, TopicSpec};
use crate::infrastructure::codec::{CodecError, JsonCodec, SchemaGovernedCodec};
use crate::infrastructure::metrics;

/// Bound on the flush performed by `close`.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// Output topic could not be provisioned.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Record could not be encoded.
    #[error("failed to encode record: {0}")]
    Codec(#[from] CodecError),

    /// Record could not be enqueued.
    #[error("failed to enqueue record: {0}")]
    Broker(#[from] BrokerError),
}

/// Milliseconds since the Unix epoch, for event-time keys.
#[must_use]
pub fn time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Shared Send Path
// =============================================================================

struct Publisher {
    topic: TopicName,
    port: Arc<dyn ProducerPort>,
    producer_id: String,
    /// Next sequence number. Held across the enqueue so ports see each
    /// producer's records in sequence order.
    next_sequence: Mutex<u64>,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl Publisher {
    async fn provisioned(
        spec: &TopicSpec,
        provisioner: &TopicProvisioner,
        port: Arc<dyn ProducerPort>,
    ) -> Result<Self, ProducerError> {
        provisioner.ensure(spec).await?;
        Ok(Self {
            topic: spec.name.clone(),
            port,
            producer_id: uuid::Uuid::new_v4().to_string(),
            next_sequence: Mutex::new(0),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            closed: AtomicBool::new(false),
        })
    }

    async fn send(&self, key: Option<Vec<u8>>, value: Vec<u8>) -> Result<(), ProducerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed.into());
        }
        let mut next_sequence = self.next_sequence.lock().await;
        let record = OutboundRecord {
            topic: self.topic.clone(),
            key,
            value,
            producer_id: self.producer_id.clone(),
            sequence: *next_sequence,
        };
        self.port.send(record).await?;
        *next_sequence += 1;
        drop(next_sequence);
        metrics::record_published(self.topic.as_str());
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.port.flush(self.flush_timeout).await {
            Ok(0) => tracing::debug!(topic = %self.topic, "Producer flushed"),
            Ok(pending) => tracing::warn!(
                topic = %self.topic,
                pending,
                timeout_ms = self.flush_timeout.as_millis(),
                "Producer flush timed out, abandoning in-flight records"
            ),
            Err(e) => tracing::warn!(topic = %self.topic, error = %e, "Producer flush failed"),
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // Best-effort flush when the owner never called close.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let port = Arc::clone(&self.port);
            let timeout = self.flush_timeout;
            let topic = self.topic.clone();
            handle.spawn(async move {
                if let Ok(pending @ 1..) = port.flush(timeout).await {
                    tracing::warn!(%topic, pending, "Dropped producer left records undelivered");
                }
            });
        } else {
            tracing::warn!(topic = %self.topic, "Producer dropped without close");
        }
    }
}

// =============================================================================
// Schema-Governed Producer
// =============================================================================

/// Publishes records of kind `R` to one topic.
pub struct EventProducer<R: SchemaGoverned> {
    publisher: Publisher,
    codec: SchemaGovernedCodec,
    _record: PhantomData<fn() -> R>,
}

impl<R: SchemaGoverned> EventProducer<R> {
    /// Provision `spec` and bind a producer to it.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Provision`] if the topic cannot be created,
    /// or [`ProducerError::Codec`] if `R` has no registered schema pair.
    pub async fn create(
        spec: &TopicSpec,
        provisioner: &TopicProvisioner,
        codec: SchemaGovernedCodec,
        port: Arc<dyn ProducerPort>,
    ) -> Result<Self, ProducerError> {
        codec.pair_for::<R>()?;
        let publisher = Publisher::provisioned(spec, provisioner, port).await?;
        tracing::debug!(
            topic = %spec.name,
            kind = R::KIND.subject(),
            producer_id = %publisher.producer_id,
            "Event producer ready"
        );
        Ok(Self {
            publisher,
            codec,
            _record: PhantomData,
        })
    }

    /// Override the close flush bound.
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.publisher.flush_timeout = timeout;
        self
    }

    /// Bound topic.
    #[must_use]
    pub const fn topic(&self) -> &TopicName {
        &self.publisher.topic
    }

    /// Encode and enqueue one record.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the producer is closed, or the
    /// client refuses the record.
    pub async fn publish(&self, key: &R::Key, value: &R::Value) -> Result<(), ProducerError> {
        let key = self.codec.encode_key::<R>(key)?;
        let value = self.codec.encode_value::<R>(value)?;
        self.publisher.send(Some(key), value).await
    }

    /// Flush in-flight records within the configured bound. Idempotent.
    pub async fn close(&self) {
        self.publisher.close().await;
    }
}

impl<R: SchemaGoverned> std::fmt::Debug for EventProducer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProducer")
            .field("topic", &self.publisher.topic)
            .field("kind", &R::KIND)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// JSON Producer
// =============================================================================

/// Publishes plain JSON records to one topic.
pub struct JsonEventProducer {
    publisher: Publisher,
    codec: JsonCodec,
}

impl JsonEventProducer {
    /// Provision `spec` and bind a producer to it.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Provision`] if the topic cannot be created.
    pub async fn create(
        spec: &TopicSpec,
        provisioner: &TopicProvisioner,
        port: Arc<dyn ProducerPort>,
    ) -> Result<Self, ProducerError> {
        let publisher = Publisher::provisioned(spec, provisioner, port).await?;
        Ok(Self {
            publisher,
            codec: JsonCodec::new(),
        })
    }

    /// Bound topic.
    #[must_use]
    pub const fn topic(&self) -> &TopicName {
        &self.publisher.topic
    }

    /// Serialize and enqueue one record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, the producer is closed, or
    /// the client refuses the record.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        key: Option<&str>,
        value: &T,
    ) -> Result<(), ProducerError> {
        let value = self.codec.encode(value)?;
        let key = key.map(|k| k.as_bytes().to_vec());
        self.publisher.send(key, value).await
    }

    /// Flush in-flight records within the configured bound. Idempotent.
    pub async fn close(&self) {
        self.publisher.close().await;
    }
}

impl std::fmt::Debug for JsonEventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonEventProducer")
            .field("topic", &self.publisher.topic)
            .finish_non_exhaustive()
    }
}
