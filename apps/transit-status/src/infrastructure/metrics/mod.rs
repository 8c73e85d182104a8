//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Records**: Counts of records received, dropped and published per topic
//! - **Consumers**: Running consumer count and poll errors
//! - **Provisioning**: Topics created by this process
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::lines::DropReason;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Record counters
    describe_counter!(
        "transit_records_received_total",
        "Total records delivered to handlers, by topic"
    );
    describe_counter!(
        "transit_records_dropped_total",
        "Total records dropped by the aggregator, by reason"
    );
    describe_counter!(
        "transit_records_published_total",
        "Total records enqueued for publication, by topic"
    );

    // Consumer health
    describe_gauge!(
        "transit_consumers_running",
        "Number of subscription consumers currently polling"
    );
    describe_counter!(
        "transit_poll_errors_total",
        "Total transport or envelope errors seen while polling, by topic"
    );

    // Provisioning
    describe_counter!(
        "transit_topics_created_total",
        "Total topics created by this process"
    );

    // Latency
    describe_histogram!(
        "transit_aggregation_apply_seconds",
        "Time to apply one record to the aggregated state"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a delivered record never reaches the aggregated state.
#[derive(Debug, Clone, Copy)]
pub enum DropLabel {
    /// Rejected by the line state machine.
    Aggregation(DropReason),
    /// Payload could not be decoded.
    Decode,
    /// Weather status not recognized.
    UnknownWeather,
}

impl DropLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Aggregation(reason) => reason.as_str(),
            Self::Decode => "decode",
            Self::UnknownWeather => "unknown_weather",
        }
    }
}

/// Record a record delivered to a handler.
pub fn record_received(topic: &str) {
    counter!(
        "transit_records_received_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Record a dropped record.
pub fn record_dropped(label: DropLabel) {
    counter!(
        "transit_records_dropped_total",
        "reason" => label.as_str()
    )
    .increment(1);
}

/// Record a published record.
pub fn record_published(topic: &str) {
    counter!(
        "transit_records_published_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Record a poll error.
pub fn record_poll_error(topic: &str) {
    counter!(
        "transit_poll_errors_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Record a topic created by this process.
pub fn record_topic_created() {
    counter!("transit_topics_created_total").increment(1);
}

/// Adjust the running consumer count.
pub fn consumer_started() {
    gauge!("transit_consumers_running").increment(1.0);
}

/// Adjust the running consumer count.
pub fn consumer_stopped() {
    gauge!("transit_consumers_running").decrement(1.0);
}

/// Record how long one aggregation step took.
pub fn record_apply_duration(duration: Duration) {
    histogram!("transit_aggregation_apply_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_label_as_str() {
        assert_eq!(
            DropLabel::Aggregation(DropReason::UnknownLine).as_str(),
            DropReason::UnknownLine.as_str()
        );
        assert_eq!(DropLabel::Decode.as_str(), "decode");
        assert_eq!(DropLabel::UnknownWeather.as_str(), "unknown_weather");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_received("org.transit.arrivals");
        record_dropped(DropLabel::Decode);
        consumer_started();
        consumer_stopped();
    }
}
