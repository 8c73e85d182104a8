//! Aggregation Engine Port (Driven Port)
//!
//! Interface to the external continuous-aggregation engine that maintains
//! the running turnstile totals.

use async_trait::async_trait;

use super::BrokerError;

/// Port for submitting declarative statements to the aggregation engine.
#[async_trait]
pub trait AggregationEnginePort: Send + Sync {
    /// Submit one or more `;`-terminated statements.
    async fn submit_statement(&self, statement: &str) -> Result<(), BrokerError>;
}
