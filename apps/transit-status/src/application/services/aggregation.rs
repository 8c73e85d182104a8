//! Aggregation Service
//!
//! Every consumer hands its records to a [`ChannelHandler`], which forwards
//! them over one bounded channel to a single aggregation task. That task is
//! the only writer of the [`TransitState`], and applies each record under
//! one write lock, so a [`SnapshotReader`] never observes a half-applied
//! record.
//!
//! ```text
//! consumer (weather)   --+
//! consumer (stations)  --+--> mpsc --> AggregationService --> TransitState
//! consumer (arrivals)  --+                                         |
//! consumer (summary)   --+                         SnapshotReader <+
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::consumer::RecordHandler;
use crate::application::ports::DeliveredRecord;
use crate::domain::records::{
    ArrivalEvent, Arrivals, ReducedStation, TurnstileSummary, WeatherEvent, WeatherReadings,
};
use crate::domain::snapshot::{AggregatedSnapshot, TransitState};
use crate::domain::topic::TopicCatalog;
use crate::infrastructure::codec::{CodecError, JsonCodec, SchemaGovernedCodec};
use crate::infrastructure::metrics::{self, DropLabel};

/// Default capacity of the aggregation channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Routing
// =============================================================================

/// A delivered record, decoded according to its topic.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Reduced station topology.
    Station(ReducedStation),
    /// Train arrival.
    Arrival(ArrivalEvent),
    /// Running turnstile total.
    TurnstileSummary(TurnstileSummary),
    /// Weather reading.
    Weather(WeatherEvent),
    /// Record from a topic the aggregator does not track.
    Ignored,
}

/// Decodes records by topic identity.
#[derive(Debug, Clone)]
pub struct IngestRouter {
    catalog: TopicCatalog,
    codec: SchemaGovernedCodec,
    json: JsonCodec,
}

impl IngestRouter {
    /// Create a router over the configured topics.
    #[must_use]
    pub const fn new(catalog: TopicCatalog, codec: SchemaGovernedCodec) -> Self {
        Self {
            catalog,
            codec,
            json: JsonCodec::new(),
        }
    }

    /// Decode `record` into the event its topic carries.
    ///
    /// # Errors
    ///
    /// Returns the codec error when the payload does not decode.
    pub fn route(&self, record: &DeliveredRecord) -> Result<IngestEvent, CodecError> {
        let topic = record.topic.as_str();
        let bytes = record.value.as_slice();

        if self.catalog.reduced_stations == *topic {
            Ok(IngestEvent::Station(self.json.decode(bytes)?))
        } else if self.catalog.arrivals == *topic {
            Ok(IngestEvent::Arrival(self.codec.decode_value::<Arrivals>(bytes)?))
        } else if self.catalog.turnstile_summary == *topic {
            Ok(IngestEvent::TurnstileSummary(self.json.decode(bytes)?))
        } else if self.catalog.weather == *topic {
            Ok(IngestEvent::Weather(
                self.codec.decode_value::<WeatherReadings>(bytes)?,
            ))
        } else {
            tracing::debug!(topic, "Ignoring record from untracked topic");
            Ok(IngestEvent::Ignored)
        }
    }
}

/// Apply one event to the state.
///
/// Returns why the event was dropped, if it was.
pub fn apply_event(state: &mut TransitState, event: &IngestEvent) -> Option<DropLabel> {
    let applied = match event {
        IngestEvent::Station(station) => state.lines.apply_station(station).map(|_| ()),
        IngestEvent::Arrival(arrival) => state.lines.apply_arrival(arrival).map(|_| ()),
        IngestEvent::TurnstileSummary(summary) => {
            state.lines.apply_turnstile_summary(summary).map(|_| ())
        }
        IngestEvent::Weather(weather) => {
            return (!state.weather.apply(weather)).then_some(DropLabel::UnknownWeather);
        }
        IngestEvent::Ignored => Ok(()),
    };
    applied.err().map(DropLabel::Aggregation)
}

// =============================================================================
// Handler and Reader
// =============================================================================

/// Forwards delivered records into the aggregation channel.
///
/// A full channel makes `handle` wait, which stalls only the calling
/// consumer.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::Sender<DeliveredRecord>,
}

#[async_trait]
impl RecordHandler for ChannelHandler {
    async fn handle(&self, record: DeliveredRecord) {
        if let Err(e) = self.tx.send(record).await {
            tracing::debug!(topic = %e.0.topic, "Aggregation channel closed, dropping record");
        }
    }
}

/// Read access to the aggregated state.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    state: Arc<RwLock<TransitState>>,
}

impl SnapshotReader {
    /// Copy the current state.
    #[must_use]
    pub fn snapshot(&self) -> AggregatedSnapshot {
        self.state.read().snapshot()
    }
}

// =============================================================================
// Service
// =============================================================================

/// The single task that owns writes to the aggregated state.
#[derive(Debug)]
pub struct AggregationService {
    router: IngestRouter,
    state: Arc<RwLock<TransitState>>,
    rx: mpsc::Receiver<DeliveredRecord>,
}

impl AggregationService {
    /// Create the service with its handler and reader.
    #[must_use]
    pub fn new(router: IngestRouter, capacity: usize) -> (Self, ChannelHandler, SnapshotReader) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let state = Arc::new(RwLock::new(TransitState::new()));
        let service = Self {
            router,
            state: Arc::clone(&state),
            rx,
        };
        (service, ChannelHandler { tx }, SnapshotReader { state })
    }

    fn apply(&self, record: &DeliveredRecord) {
        let started = Instant::now();
        let event = match self.router.route(record) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Dropping undecodable record"
                );
                metrics::record_dropped(DropLabel::Decode);
                return;
            }
        };

        let dropped = apply_event(&mut self.state.write(), &event);
        if let Some(label) = dropped {
            metrics::record_dropped(label);
        }
        metrics::record_apply_duration(started.elapsed());
    }

    /// Apply records until every handler is dropped or `cancel` fires.
    ///
    /// On cancellation, records already queued are applied before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Aggregation service started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let mut drained = 0_usize;
                    while let Ok(record) = self.rx.try_recv() {
                        self.apply(&record);
                        drained += 1;
                    }
                    tracing::info!(drained, "Aggregation service cancelled");
                    break;
                }
                record = self.rx.recv() => match record {
                    Some(record) => self.apply(&record),
                    None => {
                        tracing::info!("All handlers dropped, aggregation service stopping");
                        break;
                    }
                },
            }
        }
    }
}
