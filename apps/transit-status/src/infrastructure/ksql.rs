//! Aggregation engine adapter over the ksql HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{AggregationEnginePort, BrokerError};

const KSQL_CONTENT_TYPE: &str = "application/vnd.ksql.v1+json";

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    ksql: &'a str,
    #[serde(rename = "streamsProperties")]
    streams_properties: StreamsProperties,
}

#[derive(Debug, Serialize)]
struct StreamsProperties {
    #[serde(rename = "ksql.streams.auto.offset.reset")]
    auto_offset_reset: &'static str,
}

/// Submits statements to the `/ksql` endpoint.
#[derive(Debug, Clone)]
pub struct KsqlClient {
    client: Client,
    base_url: String,
}

impl KsqlClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BrokerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BrokerError::transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AggregationEnginePort for KsqlClient {
    async fn submit_statement(&self, statement: &str) -> Result<(), BrokerError> {
        // Tables read their source topics from the start.
        let body = StatementRequest {
            ksql: statement,
            streams_properties: StreamsProperties {
                auto_offset_reset: "earliest",
            },
        };
        let response = self
            .client
            .post(format!("{}/ksql", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, KSQL_CONTENT_TYPE)
            .body(serde_json::to_vec(&body).map_err(BrokerError::decode)?)
            .send()
            .await
            .map_err(BrokerError::transport)?;

        let status = response.status();
        let text = response.text().await.map_err(BrokerError::transport)?;
        if !status.is_success() {
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }
        tracing::debug!(response = %text, "Statement accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn posts_statement_with_earliest_reset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ksql"))
            .and(header("content-type", KSQL_CONTENT_TYPE))
            .and(body_json(serde_json::json!({
                "ksql": "SHOW TABLES;",
                "streamsProperties": {"ksql.streams.auto.offset.reset": "earliest"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = KsqlClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        client.submit_statement("SHOW TABLES;").await.unwrap();
    }

    #[tokio::test]
    async fn rejected_statement_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ksql"))
            .respond_with(ResponseTemplate::new(400).set_body_string("line 1: syntax error"))
            .mount(&server)
            .await;

        let client = KsqlClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client.submit_statement("NOPE").await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { status: 400, .. }));
    }
}
