//! Pipeline Configuration Settings
//!
//! Configuration types for the status service, loaded from environment variables.

use std::time::Duration;

use crate::domain::topic::{TopicCatalog, TopicName};

/// Which broker adapter to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerKind {
    /// Broker REST proxy over HTTP.
    #[default]
    Rest,
    /// In-process broker (local runs only).
    Memory,
}

impl BrokerKind {
    /// Parse broker kind from string.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `rest` or `memory`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "rest" => Ok(Self::Rest),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "TRANSIT_BROKER".to_string(),
                value: s.to_string(),
            }),
        }
    }

    /// Get the broker kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Memory => "memory",
        }
    }
}

/// Broker and aggregation engine endpoints.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Adapter selection.
    pub kind: BrokerKind,
    /// REST proxy base URL.
    pub rest_proxy_url: String,
    /// Aggregation engine base URL.
    pub ksql_url: String,
    /// Prefix for consumer instance names.
    pub client_id: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Rest,
            rest_proxy_url: "http://localhost:8082".to_string(),
            ksql_url: "http://localhost:8088".to_string(),
            client_id: "transit-status".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Topic names and the shape of provisioned topics.
#[derive(Debug, Clone)]
pub struct TopicSettings {
    /// Configured topic names.
    pub catalog: TopicCatalog,
    /// Partitions for topics this service creates.
    pub partitions: i32,
    /// Replication factor for topics this service creates.
    pub replication_factor: i16,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            catalog: TopicCatalog::default(),
            partitions: 1,
            replication_factor: 1,
        }
    }
}

/// Consumer loop and shutdown timing.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Back-off after an empty poll.
    pub poll_interval: Duration,
    /// Bound on a single poll.
    pub poll_timeout: Duration,
    /// Capacity of the aggregation channel.
    pub channel_capacity: usize,
    /// Bound on waiting for consumers and the aggregator at shutdown.
    pub drain_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            poll_timeout: Duration::from_millis(100),
            channel_capacity: 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Status HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8888 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Broker endpoints.
    pub broker: BrokerSettings,
    /// Topic settings.
    pub topics: TopicSettings,
    /// Consumer settings.
    pub consumer: ConsumerSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an empty or invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let broker = BrokerSettings {
            kind: env
                .string("TRANSIT_BROKER")?
                .map_or(Ok(defaults.broker.kind), |s| BrokerKind::parse(&s))?,
            rest_proxy_url: env
                .string("REST_PROXY_URL")?
                .unwrap_or(defaults.broker.rest_proxy_url),
            ksql_url: env.string("KSQL_URL")?.unwrap_or(defaults.broker.ksql_url),
            client_id: env
                .string("TRANSIT_CLIENT_ID")?
                .unwrap_or(defaults.broker.client_id),
            request_timeout: env.duration_millis(
                "TRANSIT_REQUEST_TIMEOUT_MS",
                defaults.broker.request_timeout,
            )?,
        };

        let catalog = defaults.topics.catalog;
        let topic = |key: &str, default: TopicName| -> Result<TopicName, ConfigError> {
            Ok(env.string(key)?.map_or(default, TopicName::from))
        };
        let topics = TopicSettings {
            catalog: TopicCatalog {
                arrivals: topic("TRANSIT_TOPIC_ARRIVALS", catalog.arrivals)?,
                stations: topic("TRANSIT_TOPIC_STATIONS", catalog.stations)?,
                reduced_stations: topic("TRANSIT_TOPIC_STATIONS_REDUCED", catalog.reduced_stations)?,
                turnstiles: topic("TRANSIT_TOPIC_TURNSTILES", catalog.turnstiles)?,
                turnstile_summary: topic(
                    "TRANSIT_TOPIC_TURNSTILE_SUMMARY",
                    catalog.turnstile_summary,
                )?,
                weather: topic("TRANSIT_TOPIC_WEATHER", catalog.weather)?,
            },
            partitions: env.parse("TRANSIT_TOPIC_PARTITIONS", defaults.topics.partitions)?,
            replication_factor: env.parse(
                "TRANSIT_TOPIC_REPLICATION_FACTOR",
                defaults.topics.replication_factor,
            )?,
        };

        let consumer = ConsumerSettings {
            poll_interval: env
                .duration_millis("TRANSIT_POLL_INTERVAL_MS", defaults.consumer.poll_interval)?,
            poll_timeout: env
                .duration_millis("TRANSIT_POLL_TIMEOUT_MS", defaults.consumer.poll_timeout)?,
            channel_capacity: env.parse(
                "TRANSIT_CHANNEL_CAPACITY",
                defaults.consumer.channel_capacity,
            )?,
            drain_timeout: env
                .duration_millis("TRANSIT_DRAIN_TIMEOUT_MS", defaults.consumer.drain_timeout)?,
        };

        let server = ServerSettings {
            health_port: env.parse("TRANSIT_HEALTH_PORT", defaults.server.health_port)?,
        };

        Ok(Self {
            broker,
            topics,
            consumer,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set, non-empty value. Unset is `None`; set but blank is an error.
    fn string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(Some(v)),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.string(key)?.map_or(Ok(default), |v| {
            v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            })
        })
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.string(key)?.map_or(Ok(default), |v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v,
                })
        })
    }
}
