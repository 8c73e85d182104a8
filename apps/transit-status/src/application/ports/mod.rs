//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerAdminPort`: Topic creation and listing
//! - `ProducerPort`: Record publication
//! - `ConsumerPort`: Subscription polling with rebalance callbacks
//! - `AggregationEnginePort`: Statement submission to the aggregation engine

mod aggregation_engine_port;
mod broker_port;

pub use aggregation_engine_port::AggregationEnginePort;
pub use broker_port::{
    BrokerAdminPort, BrokerError, ConsumerFactory, ConsumerPort, CreateTopicOutcome,
    DeliveredRecord, KeepCommitted, OutboundRecord, PartitionAssignment, ProducerPort,
    RebalanceListener, ResetToEarliest, SEQUENCE_WINDOW, SequenceWindow, StartOffset,
};
