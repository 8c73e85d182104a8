//! REST proxy request and response bodies.

use serde::{Deserialize, Serialize};

/// Error body returned by the proxy for non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyErrorResponse {
    /// Proxy error code (e.g. 40002 for an existing topic).
    #[serde(default)]
    pub error_code: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Admin (v3)
// =============================================================================

/// `GET /v3/clusters` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterList {
    /// Clusters behind the proxy.
    pub data: Vec<ClusterData>,
}

/// One cluster entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterData {
    /// Cluster id used in v3 paths.
    pub cluster_id: String,
}

/// `POST /v3/clusters/{id}/topics` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTopicRequest<'a> {
    /// Topic name.
    pub topic_name: &'a str,
    /// Partition count.
    pub partitions_count: i32,
    /// Replication factor.
    pub replication_factor: i16,
}

// =============================================================================
// Producer (v2, binary embedded format)
// =============================================================================

/// `POST /topics/{topic}` body.
#[derive(Debug, Clone, Serialize)]
pub struct ProduceRequest {
    /// Records to append.
    pub records: Vec<ProduceRecord>,
}

/// One base64-encoded record.
#[derive(Debug, Clone, Serialize)]
pub struct ProduceRecord {
    /// Encoded key.
    pub key: Option<String>,
    /// Encoded value.
    pub value: String,
}

/// `POST /topics/{topic}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProduceResponse {
    /// Per-record placement.
    #[serde(default)]
    pub offsets: Vec<ProduceOffset>,
}

/// Placement or failure of one produced record.
#[derive(Debug, Clone, Deserialize)]
pub struct ProduceOffset {
    /// Assigned partition.
    pub partition: Option<i32>,
    /// Assigned offset.
    pub offset: Option<i64>,
    /// Per-record error code.
    #[serde(default)]
    pub error_code: Option<i64>,
    /// Per-record error message.
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Consumer (v2)
// =============================================================================

/// `POST /consumers/{group}` body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConsumerRequest<'a> {
    /// Instance name.
    pub name: &'a str,
    /// Embedded format of fetched records.
    pub format: &'static str,
    /// Start position when the group has no committed offset.
    #[serde(rename = "auto.offset.reset")]
    pub auto_offset_reset: &'static str,
    /// Commit fetched positions automatically.
    #[serde(rename = "auto.commit.enable")]
    pub auto_commit_enable: &'static str,
}

/// `POST /consumers/{group}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerInstance {
    /// Instance id.
    pub instance_id: String,
    /// Absolute URL of the instance.
    pub base_uri: String,
}

/// Subscription body. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionRequest {
    /// Explicit topic list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    /// Regular expression over topic names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_pattern: Option<String>,
}

/// Topic-partition pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,
    /// Partition number.
    pub partition: i32,
}

/// Partition list used by assignment and seek endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionList {
    /// Partitions.
    pub partitions: Vec<TopicPartition>,
}

/// One fetched record in binary embedded format.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedRecord {
    /// Source topic.
    pub topic: String,
    /// Base64 key.
    pub key: Option<String>,
    /// Base64 value.
    pub value: Option<String>,
    /// Source partition.
    pub partition: i32,
    /// Record offset.
    pub offset: i64,
}
