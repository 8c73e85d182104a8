//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TopicProvisioner`: Creates output topics once per process
//! - `EventProducer`: Publishes records to a provisioned topic
//! - `SubscriptionConsumer`: Poll/dispatch loop for one subscription
//! - `ConsumerSupervisor`: Runs and stops consumers as a unit
//! - `AggregationService`: Single writer of the aggregated transit state
//! - `StartupGate`: Upstream topic preconditions

mod aggregation;
mod consumer;
mod producer;
mod provisioner;
mod startup;
mod supervisor;

pub use aggregation::{
    AggregationService, ChannelHandler, DEFAULT_CHANNEL_CAPACITY, IngestEvent, IngestRouter,
    SnapshotReader, apply_event,
};
pub use consumer::{
    ConsumerState, ConsumerStatus, ConsumerStatusSnapshot, DEFAULT_POLL_INTERVAL,
    DEFAULT_POLL_TIMEOUT, FnHandler, RecordHandler, SubscriptionConsumer, SubscriptionSpec,
};
pub use producer::{
    DEFAULT_FLUSH_TIMEOUT, EventProducer, JsonEventProducer, ProducerError, time_millis,
};
pub use provisioner::{ProvisionError, ProvisionedTopicSet, TopicProvisioner};
pub use startup::{
    StartupError, StartupGate, SummaryTableBootstrap, UpstreamRequirement,
    summary_table_statement,
};
pub use supervisor::{ConsumerSupervisor, DEFAULT_DRAIN_TIMEOUT};
