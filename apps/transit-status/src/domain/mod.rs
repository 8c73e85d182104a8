//! Domain Layer - Core transit types and aggregation logic.
//!
//! This layer contains the record types, topic identities and the per-line
//! aggregation state machine. Nothing here performs I/O.

/// Topic names, patterns and provisioning shapes.
pub mod topic;

/// Wire record types and their schema bindings.
pub mod records;

/// Per-line aggregation state machine.
pub mod lines;

/// Latest weather reading.
pub mod weather;

/// Aggregated state and its read view.
pub mod snapshot;
