//! Broker REST Proxy Adapter
//!
//! Implements the broker ports over the HTTP interface of a broker REST
//! proxy: v3 endpoints for topic administration, v2 endpoints with the
//! binary embedded format for producing and consuming.

mod api_types;
mod client;
mod consumer;
mod producer;

pub use client::{RestProxyClient, RestProxyConfig, V2_BINARY, V2_JSON};
pub use consumer::RestConsumer;
pub use producer::RestProducer;
