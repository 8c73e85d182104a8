//! Record Codecs
//!
//! - [`SchemaGovernedCodec`]: enveloped `MessagePack` records validated
//!   against a registered, versioned schema (arrivals, turnstiles, weather)
//! - [`JsonCodec`]: plain JSON for records produced by the external stream
//!   transformer and aggregation engine

mod governed;
mod json;
mod schema;

pub use governed::SchemaGovernedCodec;
pub use json::JsonCodec;
pub use schema::{FieldType, Schema, SchemaField, SchemaPair, SchemaRegistry};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Envelope was written with a different schema.
    #[error("schema mismatch: expected schema {expected}, found {found}")]
    SchemaMismatch {
        /// Schema id the caller decoded with.
        expected: u32,
        /// Schema id in the envelope.
        found: u32,
    },

    /// Record does not satisfy the schema.
    #[error("record violates schema {schema}: {reason}")]
    SchemaViolation {
        /// Schema subject.
        schema: String,
        /// First violation found.
        reason: String,
    },

    /// Frame is not a well-formed envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Envelope names a schema id that is not registered.
    #[error("unknown schema id {0}")]
    UnknownSchema(u32),

    /// No schema registered under the subject.
    #[error("missing schema for subject {0}")]
    MissingSchema(String),

    /// Schema document could not be parsed.
    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),

    /// Two schema documents share an id.
    #[error("duplicate schema id {0}")]
    DuplicateSchemaId(u32),

    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// `MessagePack` encoding failed.
    #[error("`MessagePack` encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// `MessagePack` decoding failed.
    #[error("`MessagePack` decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Schema directory could not be read.
    #[error("schema I/O error: {0}")]
    Io(#[from] std::io::Error),
}
