//! Producer port over the REST proxy.
//!
//! `send` enqueues onto an unbounded queue drained by one background task,
//! which posts each record in binary embedded format. A flush pushes a
//! marker through the same queue, so it completes once everything queued
//! before it has been attempted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::{mpsc, oneshot};

use super::api_types::{ProduceRecord, ProduceRequest, ProduceResponse};
use super::client::{RestProxyClient, V2_BINARY, V2_JSON};
use crate::application::ports::{BrokerError, OutboundRecord, ProducerPort, SequenceWindow};

/// Delivery attempts per record before it is dropped.
const MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

enum Command {
    Deliver(OutboundRecord),
    Flush(oneshot::Sender<()>),
}

/// Producer backed by a background delivery task.
#[derive(Debug)]
pub struct RestProducer {
    tx: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicUsize>,
}

impl RestProducer {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(client: RestProxyClient) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(deliver_loop(client, rx, Arc::clone(&pending)));
        Self { tx, pending }
    }

    /// Records accepted but not yet attempted.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ProducerPort for RestProducer {
    async fn send(&self, record: OutboundRecord) -> Result<(), BrokerError> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Command::Deliver(record)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> Result<usize, BrokerError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .map_err(|_| BrokerError::Closed)?;
        match tokio::time::timeout(timeout, done_rx).await {
            Ok(Ok(())) => Ok(0),
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => Ok(self.pending()),
        }
    }
}

async fn deliver_loop(
    client: RestProxyClient,
    mut rx: mpsc::UnboundedReceiver<Command>,
    pending: Arc<AtomicUsize>,
) {
    let mut sequences = SequenceWindow::default();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Deliver(record) => {
                if sequences.admit(&record.producer_id, record.sequence) {
                    deliver_with_retry(&client, &record).await;
                } else {
                    tracing::debug!(
                        producer_id = %record.producer_id,
                        sequence = record.sequence,
                        "Skipping duplicate record"
                    );
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Producer queue closed");
}

async fn deliver_with_retry(client: &RestProxyClient, record: &OutboundRecord) {
    let mut delay = INITIAL_BACKOFF;
    for attempt in 1..=MAX_ATTEMPTS {
        match deliver(client, record).await {
            Ok(()) => return,
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    topic = %record.topic,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(
                    topic = %record.topic,
                    attempt,
                    error = %e,
                    "Dropping undeliverable record"
                );
                return;
            }
        }
    }
}

async fn deliver(client: &RestProxyClient, record: &OutboundRecord) -> Result<(), BrokerError> {
    let body = ProduceRequest {
        records: vec![ProduceRecord {
            key: record.key.as_ref().map(|k| STANDARD.encode(k)),
            value: STANDARD.encode(&record.value),
        }],
    };
    let request = client
        .http()
        .post(client.url(&format!("/topics/{}", record.topic)))
        .header(reqwest::header::CONTENT_TYPE, V2_BINARY)
        .header(reqwest::header::ACCEPT, V2_JSON)
        .body(serde_json::to_vec(&body).map_err(BrokerError::decode)?);

    let response: ProduceResponse = client.execute_json(request).await?;
    // Per-record codes are the HTTP status followed by two digits.
    if let Some((code, failed)) = response
        .offsets
        .iter()
        .find_map(|o| o.error_code.map(|code| (code, o)))
    {
        return Err(BrokerError::Rejected {
            status: u16::try_from(code / 100).unwrap_or(500),
            message: failed.error.clone().unwrap_or_default(),
        });
    }
    if let Some(placed) = response.offsets.first() {
        tracing::trace!(
            topic = %record.topic,
            partition = ?placed.partition,
            offset = ?placed.offset,
            "Record delivered"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::infrastructure::rest_proxy::RestProxyConfig;

    fn record(sequence: u64) -> OutboundRecord {
        OutboundRecord {
            topic: "org.transit.weather".into(),
            key: Some(b"k".to_vec()),
            value: b"v".to_vec(),
            producer_id: "p".to_string(),
            sequence,
        }
    }

    fn accepted() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "offsets": [{"partition": 0, "offset": 7, "error_code": null, "error": null}]
        }))
    }

    #[tokio::test]
    async fn posts_base64_records_and_flushes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/org.transit.weather"))
            .and(header("content-type", V2_BINARY))
            .and(body_json(serde_json::json!({
                "records": [{"key": "aw==", "value": "dg=="}]
            })))
            .respond_with(accepted())
            .expect(1)
            .mount(&server)
            .await;

        let client = RestProxyClient::new(&RestProxyConfig::new(server.uri(), "t")).unwrap();
        let producer = RestProducer::start(client);
        producer.send(record(0)).await.unwrap();
        // Same sequence again is a retry of the first send.
        producer.send(record(0)).await.unwrap();

        let pending = producer.flush(Duration::from_secs(5)).await.unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/org.transit.weather"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/topics/org.transit.weather"))
            .respond_with(accepted())
            .expect(1)
            .mount(&server)
            .await;

        let client = RestProxyClient::new(&RestProxyConfig::new(server.uri(), "t")).unwrap();
        let producer = RestProducer::start(client);
        producer.send(record(0)).await.unwrap();
        assert_eq!(producer.flush(Duration::from_secs(5)).await.unwrap(), 0);
    }
}
