//! Consumer port over the REST proxy.
//!
//! Each subscription owns one proxy consumer instance. Before every fetch
//! the adapter reads the instance's assignment; partitions seen for the
//! first time go through the rebalance listener, and those it rewinds are
//! seeked to the beginning before records are read.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::api_types::{
    ConsumerInstance, CreateConsumerRequest, FetchedRecord, PartitionList, SubscriptionRequest,
    TopicPartition,
};
use super::client::{RestProxyClient, V2_BINARY, V2_JSON};
use crate::application::ports::{
    BrokerError, ConsumerFactory, ConsumerPort, DeliveredRecord, PartitionAssignment,
    RebalanceListener, StartOffset,
};
use crate::domain::topic::TopicPattern;

/// Proxy-side consumer bound to one group.
pub struct RestConsumer {
    client: RestProxyClient,
    group_id: String,
    instance: Option<ConsumerInstance>,
    listener: Option<Arc<dyn RebalanceListener>>,
    assigned: HashSet<TopicPartition>,
    buffer: VecDeque<DeliveredRecord>,
    closed: bool,
}

impl RestConsumer {
    /// Consumer in `group_id`; the proxy instance is created on subscribe.
    #[must_use]
    pub fn new(client: RestProxyClient, group_id: impl Into<String>) -> Self {
        Self {
            client,
            group_id: group_id.into(),
            instance: None,
            listener: None,
            assigned: HashSet::new(),
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    fn base_uri(&self) -> Result<&str, BrokerError> {
        self.instance
            .as_ref()
            .map(|i| i.base_uri.as_str())
            .ok_or_else(|| BrokerError::Rejected {
                status: 409,
                message: "consumer is not subscribed".to_string(),
            })
    }

    async fn create_instance(&self) -> Result<ConsumerInstance, BrokerError> {
        let name = format!("{}-{}", self.client.client_id(), uuid::Uuid::new_v4());
        let body = CreateConsumerRequest {
            name: &name,
            format: "binary",
            auto_offset_reset: "latest",
            auto_commit_enable: "true",
        };
        let request = self
            .client
            .http()
            .post(self.client.url(&format!("/consumers/{}", self.group_id)))
            .header(reqwest::header::CONTENT_TYPE, V2_JSON)
            .body(serde_json::to_vec(&body).map_err(BrokerError::decode)?);
        self.client.execute_json(request).await
    }

    /// Run newly assigned partitions through the listener and apply the
    /// starts it chose.
    async fn sync_assignment(&mut self) -> Result<(), BrokerError> {
        let base = self.base_uri()?.to_string();
        let current: PartitionList = self
            .client
            .execute_json(
                self.client
                    .http()
                    .get(format!("{base}/assignments"))
                    .header(reqwest::header::ACCEPT, V2_JSON),
            )
            .await?;

        let current: HashSet<TopicPartition> = current.partitions.into_iter().collect();
        let mut fresh: Vec<PartitionAssignment> = current
            .difference(&self.assigned)
            .map(|tp| PartitionAssignment::new(tp.topic.clone(), tp.partition))
            .collect();
        self.assigned = current;
        if fresh.is_empty() {
            return Ok(());
        }

        if let Some(listener) = &self.listener {
            listener.on_assign(&mut fresh);
        }
        tracing::debug!(
            group_id = %self.group_id,
            partitions = fresh.len(),
            "Partitions assigned"
        );

        for (start, endpoint) in [
            (StartOffset::Beginning, "beginning"),
            (StartOffset::End, "end"),
        ] {
            let partitions: Vec<TopicPartition> = fresh
                .iter()
                .filter(|a| a.start == start)
                .map(|a| TopicPartition {
                    topic: a.topic.clone(),
                    partition: a.partition,
                })
                .collect();
            if partitions.is_empty() {
                continue;
            }
            // Records already buffered from these partitions would be replayed.
            self.buffer.retain(|r| {
                !partitions
                    .iter()
                    .any(|tp| tp.topic == r.topic && tp.partition == r.partition)
            });
            let body = serde_json::to_vec(&PartitionList { partitions })
                .map_err(BrokerError::decode)?;
            self.client
                .execute(
                    self.client
                        .http()
                        .post(format!("{base}/positions/{endpoint}"))
                        .header(reqwest::header::CONTENT_TYPE, V2_JSON)
                        .body(body),
                )
                .await?;
        }
        Ok(())
    }

    async fn fetch(&mut self, timeout: Duration) -> Result<(), BrokerError> {
        let base = self.base_uri()?.to_string();
        let records: Vec<FetchedRecord> = self
            .client
            .execute_json(
                self.client
                    .http()
                    .get(format!("{base}/records"))
                    .query(&[("timeout", timeout.as_millis().to_string())])
                    .header(reqwest::header::ACCEPT, V2_BINARY),
            )
            .await?;

        // The proxy has already committed past the whole batch, so one bad
        // record must not take its neighbours down with it.
        for record in records {
            let (topic, partition, offset) = (record.topic.clone(), record.partition, record.offset);
            match decode_record(record) {
                Ok(delivered) => self.buffer.push_back(delivered),
                Err(e) => tracing::warn!(
                    %topic,
                    partition,
                    offset,
                    error = %e,
                    "Skipping record with undecodable payload"
                ),
            }
        }
        Ok(())
    }
}

fn decode_record(record: FetchedRecord) -> Result<DeliveredRecord, BrokerError> {
    let key = record
        .key
        .map(|k| STANDARD.decode(k))
        .transpose()
        .map_err(BrokerError::decode)?;
    let value = record
        .value
        .map(|v| STANDARD.decode(v))
        .transpose()
        .map_err(BrokerError::decode)?
        .unwrap_or_default();
    Ok(DeliveredRecord {
        topic: record.topic,
        key,
        value,
        partition: record.partition,
        offset: record.offset,
    })
}

#[async_trait]
impl ConsumerPort for RestConsumer {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn RebalanceListener>,
    ) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if self.instance.is_none() {
            self.instance = Some(self.create_instance().await?);
        }

        let body = match pattern {
            TopicPattern::Exact(name) => SubscriptionRequest {
                topics: Some(vec![name.to_string()]),
                topic_pattern: None,
            },
            TopicPattern::Regex { source, .. } => SubscriptionRequest {
                topics: None,
                topic_pattern: Some(source.clone()),
            },
        };
        let base = self.base_uri()?.to_string();
        self.client
            .execute(
                self.client
                    .http()
                    .post(format!("{base}/subscription"))
                    .header(reqwest::header::CONTENT_TYPE, V2_JSON)
                    .body(serde_json::to_vec(&body).map_err(BrokerError::decode)?),
            )
            .await?;

        self.listener = Some(listener);
        tracing::info!(group_id = %self.group_id, pattern = %pattern, "Subscribed via REST proxy");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<DeliveredRecord>, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if let Some(record) = self.buffer.pop_front() {
            return Ok(Some(record));
        }
        self.sync_assignment().await?;
        self.fetch(timeout).await?;
        Ok(self.buffer.pop_front())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();

        let revoked: Vec<PartitionAssignment> = self
            .assigned
            .drain()
            .map(|tp| PartitionAssignment::new(tp.topic, tp.partition))
            .collect();
        if let Some(listener) = self.listener.take() {
            listener.on_revoke(&revoked);
        }

        if let Some(instance) = self.instance.take() {
            self.client
                .execute(
                    self.client
                        .http()
                        .delete(&instance.base_uri)
                        .header(reqwest::header::CONTENT_TYPE, V2_JSON),
                )
                .await?;
            tracing::debug!(instance = %instance.instance_id, "Consumer instance deleted");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RestConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConsumer")
            .field("group_id", &self.group_id)
            .field("instance", &self.instance.as_ref().map(|i| &i.instance_id))
            .field("assigned", &self.assigned.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ConsumerFactory for RestProxyClient {
    fn consumer(&self, group_id: &str) -> Box<dyn ConsumerPort> {
        Box::new(RestConsumer::new(self.clone(), group_id))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::application::ports::{KeepCommitted, ResetToEarliest};
    use crate::infrastructure::rest_proxy::RestProxyConfig;

    async fn instance(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/consumers/consumer-group-org.transit.weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instance_id": "i1",
                "base_uri": format!("{}/consumers/g/instances/i1", server.uri())
            })))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/g/instances/i1/subscription"))
            .and(body_json(serde_json::json!({"topics": ["org.transit.weather"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consumers/g/instances/i1/assignments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "partitions": [{"topic": "org.transit.weather", "partition": 0}]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consumers/g/instances/i1/records"))
            .and(query_param("timeout", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"topic": "org.transit.weather", "key": null, "value": "AA==", "partition": 0, "offset": 3}
            ])))
            .mount(server)
            .await;
    }

    async fn subscribed(
        server: &MockServer,
        listener: Arc<dyn RebalanceListener>,
    ) -> Box<dyn ConsumerPort> {
        let client = RestProxyClient::new(&RestProxyConfig::new(server.uri(), "t")).unwrap();
        let pattern = TopicPattern::parse("org.transit.weather").unwrap();
        let mut consumer = client.consumer(&pattern.group_id());
        consumer.subscribe(&pattern, listener).await.unwrap();
        consumer
    }

    #[tokio::test]
    async fn reset_listener_seeks_new_partitions_to_beginning() {
        let server = MockServer::start().await;
        instance(&server).await;
        Mock::given(method("POST"))
            .and(path("/consumers/g/instances/i1/positions/beginning"))
            .and(body_json(serde_json::json!({
                "partitions": [{"topic": "org.transit.weather", "partition": 0}]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut consumer = subscribed(&server, Arc::new(ResetToEarliest)).await;
        let first = consumer.poll(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(first.value, vec![0]);
        assert_eq!(first.offset, 3);

        // Same assignment on the next poll: no second seek.
        assert!(consumer.poll(Duration::from_millis(100)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn undecodable_record_is_skipped_and_batch_kept() {
        let server = MockServer::start().await;
        instance(&server).await;
        Mock::given(method("GET"))
            .and(path("/consumers/g/instances/i1/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"topic": "org.transit.weather", "key": null, "value": "AQ==", "partition": 0, "offset": 10},
                {"topic": "org.transit.weather", "key": null, "value": "not base64!", "partition": 0, "offset": 11},
                {"topic": "org.transit.weather", "key": null, "value": "Aw==", "partition": 0, "offset": 12}
            ])))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;

        let mut consumer = subscribed(&server, Arc::new(KeepCommitted)).await;
        let first = consumer.poll(Duration::from_millis(100)).await.unwrap().unwrap();
        let second = consumer.poll(Duration::from_millis(100)).await.unwrap().unwrap();

        assert_eq!((first.offset, first.value), (10, vec![1]));
        assert_eq!((second.offset, second.value), (12, vec![3]));
    }

    #[tokio::test]
    async fn close_deletes_instance_once() {
        let server = MockServer::start().await;
        instance(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/g/instances/i1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut consumer = subscribed(&server, Arc::new(KeepCommitted)).await;
        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(
            consumer.poll(Duration::from_millis(100)).await,
            Err(BrokerError::Closed)
        );
    }
}
