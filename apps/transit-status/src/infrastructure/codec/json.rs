//! JSON codec for records that are not schema-governed.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CodecError;

/// Plain JSON codec, used for reduced topology and turnstile summaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Serialize a record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: Serialize + ?Sized>(&self, record: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(record)?)
    }

    /// Deserialize a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
