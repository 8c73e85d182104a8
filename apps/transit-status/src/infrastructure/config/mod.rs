//! Configuration Module
//!
//! Configuration loading for the status service.

mod settings;

pub use settings::{
    BrokerKind, BrokerSettings, ConfigError, ConsumerSettings, PipelineConfig, ServerSettings,
    TopicSettings,
};
