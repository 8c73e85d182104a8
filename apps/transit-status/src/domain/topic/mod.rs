//! Topic Identity Types
//!
//! Names, subscription patterns, and provisioning shapes for broker topics.
//!
//! A [`TopicName`] is the stable identity of a logical stream. Provisioning
//! is memoized by name, so names must not change across restarts.

use std::borrow::Borrow;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

// =============================================================================
// Topic Name
// =============================================================================

/// Immutable name of a logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(String);

impl TopicName {
    /// Create a topic name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for TopicName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TopicName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq<str> for TopicName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// =============================================================================
// Topic Pattern
// =============================================================================

/// Subscription target: one topic, or every topic matching a regex.
///
/// Follows the broker convention that a subscription string starting with
/// `^` is a regular expression.
#[derive(Debug, Clone)]
pub enum TopicPattern {
    /// A single named topic.
    Exact(TopicName),
    /// All topics matching the expression.
    Regex {
        /// Source expression, including the leading `^`.
        source: String,
        /// Compiled expression.
        regex: Regex,
    },
}

impl TopicPattern {
    /// Parse a subscription string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string starts with `^` but is not a valid
    /// regular expression.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.starts_with('^') {
            let regex = Regex::new(pattern)?;
            Ok(Self::Regex {
                source: pattern.to_string(),
                regex,
            })
        } else {
            Ok(Self::Exact(TopicName::new(pattern)))
        }
    }

    /// Check whether a topic falls under this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(name) => name == topic,
            Self::Regex { regex, .. } => regex.is_match(topic),
        }
    }

    /// Original subscription string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(name) => name.as_str(),
            Self::Regex { source, .. } => source,
        }
    }

    /// Consumer group id derived from the pattern.
    ///
    /// One group per subscription, so independent consumers never share
    /// partition assignments.
    #[must_use]
    pub fn group_id(&self) -> String {
        format!("consumer-group-{}", self.as_str().replace('^', ""))
    }
}

impl From<TopicName> for TopicPattern {
    fn from(name: TopicName) -> Self {
        Self::Exact(name)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Topic Spec
// =============================================================================

/// Requested shape of a topic to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: TopicName,
    /// Number of partitions.
    pub partitions: i32,
    /// Replication factor.
    pub replication_factor: i16,
}

impl TopicSpec {
    /// Create a topic spec.
    #[must_use]
    pub fn new(name: impl Into<TopicName>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

// =============================================================================
// Topic Catalog
// =============================================================================

/// The configured topics this service produces to or consumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCatalog {
    /// Per-station arrival events (schema-governed).
    pub arrivals: TopicName,
    /// Raw station topology, input of the external stream transformer.
    pub stations: TopicName,
    /// Reduced station topology (raw JSON).
    pub reduced_stations: TopicName,
    /// Raw turnstile entries (schema-governed).
    pub turnstiles: TopicName,
    /// Running turnstile counts per station (raw JSON).
    pub turnstile_summary: TopicName,
    /// Weather readings (schema-governed).
    pub weather: TopicName,
}

impl Default for TopicCatalog {
    fn default() -> Self {
        Self {
            arrivals: TopicName::new("org.transit.arrivals"),
            stations: TopicName::new("org.transit.stations"),
            reduced_stations: TopicName::new("org.transit.stations.reduced"),
            turnstiles: TopicName::new("org.transit.turnstiles"),
            turnstile_summary: TopicName::new("TURNSTILE_SUMMARY"),
            weather: TopicName::new("org.transit.weather"),
        }
    }
}

impl TopicCatalog {
    /// Check whether a topic feeds the per-line aggregation.
    #[must_use]
    pub fn is_lines_topic(&self, topic: &str) -> bool {
        self.reduced_stations == *topic
            || self.arrivals == *topic
            || self.turnstile_summary == *topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_its_topic() {
        let pattern = TopicPattern::parse("org.transit.arrivals").unwrap();
        assert!(pattern.matches("org.transit.arrivals"));
        assert!(!pattern.matches("org.transit.arrivals.v2"));
    }

    #[test]
    fn regex_pattern_matches_prefix() {
        let pattern = TopicPattern::parse("^org.transit.station.*").unwrap();
        assert!(pattern.matches("org.transit.stations"));
        assert!(pattern.matches("org.transit.stations.reduced"));
        assert!(!pattern.matches("org.transit.weather"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(TopicPattern::parse("^org.(transit").is_err());
    }

    #[test]
    fn group_id_strips_anchor() {
        let pattern = TopicPattern::parse("^org.transit.arrivals").unwrap();
        assert_eq!(pattern.group_id(), "consumer-group-org.transit.arrivals");
    }

    #[test]
    fn catalog_lines_topics() {
        let catalog = TopicCatalog::default();
        assert!(catalog.is_lines_topic("org.transit.arrivals"));
        assert!(catalog.is_lines_topic("TURNSTILE_SUMMARY"));
        assert!(!catalog.is_lines_topic("org.transit.weather"));
    }
}
