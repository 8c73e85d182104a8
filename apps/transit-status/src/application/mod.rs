//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the broker and the aggregation engine.
pub mod ports;

/// Application services for provisioning, publishing, consuming and aggregation.
pub mod services;
