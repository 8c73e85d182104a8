//! HTTP client for the broker REST proxy, and the admin port over it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;

use super::api_types::{ClusterList, CreateTopicRequest, ProxyErrorResponse};
use crate::application::ports::{BrokerAdminPort, BrokerError, CreateTopicOutcome};
use crate::domain::topic::TopicSpec;

/// Content type of v2 JSON requests.
pub const V2_JSON: &str = "application/vnd.kafka.v2+json";

/// Content type of v2 binary-embedded requests and responses.
pub const V2_BINARY: &str = "application/vnd.kafka.binary.v2+json";

/// Proxy error code for an existing topic.
const TOPIC_EXISTS_CODE: i64 = 40_002;

/// REST proxy connection settings.
#[derive(Debug, Clone)]
pub struct RestProxyConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Prefix for consumer instance names.
    pub client_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RestProxyConfig {
    /// Settings with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Shared HTTP client for the proxy.
#[derive(Debug, Clone)]
pub struct RestProxyClient {
    client: Client,
    base_url: Arc<str>,
    client_id: Arc<str>,
    cluster_id: Arc<OnceCell<String>>,
}

impl RestProxyClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RestProxyConfig) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(BrokerError::transport)?;
        Ok(Self {
            client,
            base_url: config.base_url.as_str().into(),
            client_id: config.client_id.as_str().into(),
            cluster_id: Arc::new(OnceCell::new()),
        })
    }

    /// Proxy base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Prefix for consumer instance names.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(super) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(super) fn http(&self) -> &Client {
        &self.client
    }

    /// Send a request and return the body of a 2xx response.
    pub(super) async fn execute(&self, request: RequestBuilder) -> Result<String, BrokerError> {
        let response = request.send().await.map_err(BrokerError::transport)?;
        let status = response.status();
        let body = response.text().await.map_err(BrokerError::transport)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(error_from_response(status, &body))
        }
    }

    /// Send a request and decode the JSON body of a 2xx response.
    pub(super) async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BrokerError> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(BrokerError::decode)
    }

    async fn cluster_id(&self) -> Result<&str, BrokerError> {
        let id = self
            .cluster_id
            .get_or_try_init(|| async {
                let clusters: ClusterList = self
                    .execute_json(self.client.get(self.url("/v3/clusters")))
                    .await?;
                clusters
                    .data
                    .into_iter()
                    .next()
                    .map(|c| c.cluster_id)
                    .ok_or_else(|| BrokerError::decode("proxy reported no clusters"))
            })
            .await?;
        Ok(id.as_str())
    }
}

/// Map a non-2xx response to a broker error.
///
/// Server errors are transport failures; anything else is a rejection.
pub(super) fn error_from_response(status: StatusCode, body: &str) -> BrokerError {
    let parsed = serde_json::from_str::<ProxyErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map_or_else(|| body.to_string(), |e| e.message.clone());

    if parsed.and_then(|e| e.error_code) == Some(TOPIC_EXISTS_CODE) {
        return BrokerError::Rejected {
            status: StatusCode::CONFLICT.as_u16(),
            message,
        };
    }
    if status.is_server_error() {
        return BrokerError::Transport {
            message: format!("{status}: {message}"),
        };
    }
    BrokerError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl BrokerAdminPort for RestProxyClient {
    async fn create_topic(&self, spec: &TopicSpec) -> Result<CreateTopicOutcome, BrokerError> {
        let cluster_id = self.cluster_id().await?;
        let body = CreateTopicRequest {
            topic_name: spec.name.as_str(),
            partitions_count: spec.partitions,
            replication_factor: spec.replication_factor,
        };
        let request = self
            .client
            .post(self.url(&format!("/v3/clusters/{cluster_id}/topics")))
            .json(&body);

        match self.execute(request).await {
            Ok(_) => Ok(CreateTopicOutcome::Created),
            Err(BrokerError::Rejected { status: 409, .. }) => {
                Err(BrokerError::TopicAlreadyExists {
                    topic: spec.name.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn list_topics(&self) -> Result<BTreeSet<String>, BrokerError> {
        let topics: Vec<String> = self
            .execute_json(
                self.client
                    .get(self.url("/topics"))
                    .header(reqwest::header::ACCEPT, V2_JSON),
            )
            .await?;
        Ok(topics.into_iter().collect())
    }
}
