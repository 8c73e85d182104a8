//! Consumer Supervisor
//!
//! Runs a set of subscription consumers, one tokio task each, and stops
//! them as a unit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::consumer::{ConsumerState, ConsumerStatus, SubscriptionConsumer};
use crate::infrastructure::{metrics, telemetry};

/// Default bound on waiting for consumer tasks to finish.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns a set of consumers and their tasks.
pub struct ConsumerSupervisor {
    pending: Mutex<Vec<SubscriptionConsumer>>,
    statuses: Vec<Arc<ConsumerStatus>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    drain_timeout: Duration,
    stopped: AtomicBool,
}

impl ConsumerSupervisor {
    /// Create a supervisor whose consumers stop when `parent` is cancelled
    /// or when [`Self::stop_all`] is called.
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            statuses: Vec::new(),
            tasks: Mutex::new(Vec::new()),
            cancel: parent.child_token(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            stopped: AtomicBool::new(false),
        }
    }

    /// Override the drain bound used by [`Self::stop_all`].
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Add a consumer. Takes effect at the next [`Self::start_all`].
    pub fn add(&mut self, consumer: SubscriptionConsumer) {
        self.statuses.push(consumer.status());
        self.pending.get_mut().push(consumer);
    }

    /// Status handles of every consumer added so far.
    #[must_use]
    pub fn statuses(&self) -> &[Arc<ConsumerStatus>] {
        &self.statuses
    }

    /// Number of consumers added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether no consumer has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Spawn every pending consumer on its own task.
    ///
    /// Consumers started after a stop close as soon as they subscribe.
    pub fn start_all(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut tasks = self.tasks.lock();

        for consumer in pending {
            let cancel = self.cancel.clone();
            let span = telemetry::consumer_span(&consumer.spec().pattern);
            tasks.push(tokio::spawn(
                async move {
                    metrics::consumer_started();
                    if let Err(e) = consumer.run(cancel).await {
                        tracing::error!(error = %e, "Consumer failed to subscribe");
                    }
                    metrics::consumer_stopped();
                }
                .instrument(span),
            ));
        }
        tracing::info!(consumers = tasks.len(), "Consumers started");
    }

    /// Cancel every consumer and wait for them to close.
    ///
    /// Waits at most the drain timeout, then aborts stragglers. Safe to call
    /// more than once and from any task.
    pub async fn stop_all(&self) {
        self.cancel.cancel();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let count = tasks.len();

        let drained = tokio::time::timeout(self.drain_timeout, futures::future::join_all(tasks));
        match drained.await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::error!(error = %e, "Consumer task panicked");
                    }
                }
                tracing::info!(consumers = count, "Consumers stopped");
            }
            Err(_) => {
                let stuck: Vec<String> = self
                    .statuses
                    .iter()
                    .filter(|s| s.state() != ConsumerState::Closed)
                    .map(|s| s.pattern().to_string())
                    .collect();
                tracing::warn!(
                    consumers = count,
                    ?stuck,
                    timeout_ms = self.drain_timeout.as_millis(),
                    "Consumer drain timed out, aborting and closing in background"
                );
                // Dropping an aborted consumer closes its client.
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    /// Whether every started consumer is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tasks.lock().iter().any(JoinHandle::is_finished)
    }
}

impl std::fmt::Debug for ConsumerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSupervisor")
            .field("consumers", &self.statuses.len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
