//! Schema-governed binary codec.
//!
//! # Envelope
//!
//! ```text
//! +------+----------------+----------------------------+
//! | 0x00 | schema id (BE) | MessagePack payload (map)  |
//! +------+----------------+----------------------------+
//!   1 B        4 B                 remaining
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CodecError;
use super::schema::{Schema, SchemaPair, SchemaRegistry};
use crate::domain::records::SchemaGoverned;

const MAGIC_BYTE: u8 = 0x00;
const HEADER_LEN: usize = 5;

/// Encodes and decodes records against registered schemas.
#[derive(Debug, Clone)]
pub struct SchemaGovernedCodec {
    registry: Arc<SchemaRegistry>,
}

impl SchemaGovernedCodec {
    /// Create a codec over a loaded registry.
    #[must_use]
    pub const fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Codec over the bundled schemas.
    ///
    /// # Errors
    ///
    /// Returns an error if a bundled schema is malformed.
    pub fn builtin() -> Result<Self, CodecError> {
        Ok(Self::new(Arc::new(SchemaRegistry::builtin()?)))
    }

    /// Underlying registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Schema pair bound to `R`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingSchema`] if the pair was not loaded.
    pub fn pair_for<R: SchemaGoverned>(&self) -> Result<Arc<SchemaPair>, CodecError> {
        self.registry.pair(R::KIND)
    }

    /// Validate `record` against `schema` and wrap it in an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaViolation`] if the record does not match
    /// the schema, or a payload error if serialization fails.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        record: &T,
        schema: &Schema,
    ) -> Result<Vec<u8>, CodecError> {
        schema.validate(&serde_json::to_value(record)?)?;

        let payload = rmp_serde::to_vec_named(record)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.extend_from_slice(&schema.id.to_be_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode an envelope written with `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] when the envelope names a
    /// different schema, [`CodecError::InvalidEnvelope`] for a malformed
    /// frame, or a payload error when the body does not decode.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], schema: &Schema) -> Result<T, CodecError> {
        let found = read_header(bytes)?;
        if found != schema.id {
            return Err(CodecError::SchemaMismatch {
                expected: schema.id,
                found,
            });
        }
        Ok(rmp_serde::from_slice(&bytes[HEADER_LEN..])?)
    }

    /// Encode the key of a governed record.
    ///
    /// # Errors
    ///
    /// See [`Self::encode`].
    pub fn encode_key<R: SchemaGoverned>(&self, key: &R::Key) -> Result<Vec<u8>, CodecError> {
        self.encode(key, &self.pair_for::<R>()?.key)
    }

    /// Encode the value of a governed record.
    ///
    /// # Errors
    ///
    /// See [`Self::encode`].
    pub fn encode_value<R: SchemaGoverned>(&self, value: &R::Value) -> Result<Vec<u8>, CodecError> {
        self.encode(value, &self.pair_for::<R>()?.value)
    }

    /// Decode the value of a governed record.
    ///
    /// # Errors
    ///
    /// See [`Self::decode`].
    pub fn decode_value<R: SchemaGoverned>(&self, bytes: &[u8]) -> Result<R::Value, CodecError> {
        self.decode(bytes, &self.pair_for::<R>()?.value)
    }

    /// Schema id carried by a frame, if the frame is a well-formed envelope
    /// for a registered schema.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidEnvelope`] or
    /// [`CodecError::UnknownSchema`].
    pub fn inspect_envelope(&self, bytes: &[u8]) -> Result<u32, CodecError> {
        let id = read_header(bytes)?;
        if self.registry.by_id(id).is_none() {
            return Err(CodecError::UnknownSchema(id));
        }
        Ok(id)
    }
}

fn read_header(bytes: &[u8]) -> Result<u32, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::InvalidEnvelope(format!(
            "frame of {} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(CodecError::InvalidEnvelope(format!(
            "unexpected magic byte {:#04x}",
            bytes[0]
        )));
    }
    Ok(u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{
        ArrivalEvent, Arrivals, RecordKind, TimestampKey, TurnstileEvent, Turnstiles,
        WeatherEvent, WeatherReadings,
    };

    fn codec() -> SchemaGovernedCodec {
        SchemaGovernedCodec::builtin().unwrap()
    }

    fn arrival() -> ArrivalEvent {
        ArrivalEvent {
            station_id: 40_890,
            train_id: "BL001".to_string(),
            direction: "a".to_string(),
            line: "blue".to_string(),
            train_status: "on_time".to_string(),
            prev_station_id: None,
            prev_direction: None,
        }
    }

    #[test]
    fn arrival_survives_encoding() {
        let codec = codec();
        let bytes = codec.encode_value::<Arrivals>(&arrival()).unwrap();

        assert_eq!(bytes[0], MAGIC_BYTE);
        let decoded = codec.decode_value::<Arrivals>(&bytes).unwrap();
        assert_eq!(decoded, arrival());
    }

    #[test]
    fn envelope_carries_schema_id() {
        let codec = codec();
        let key = TimestampKey { timestamp: 1_700_000_000_000 };
        let bytes = codec.encode_key::<WeatherReadings>(&key).unwrap();

        let id = codec.inspect_envelope(&bytes).unwrap();
        let pair = codec.registry().pair(RecordKind::Weather).unwrap();
        assert_eq!(id, pair.key.id);
    }

    #[test]
    fn decoding_with_another_schema_is_a_mismatch() {
        let codec = codec();
        let bytes = codec
            .encode_value::<Turnstiles>(&TurnstileEvent {
                station_id: 1,
                station_name: "Austin".to_string(),
                line: "green".to_string(),
            })
            .unwrap();

        let result = codec.decode_value::<WeatherReadings>(&bytes);
        assert!(matches!(
            result,
            Err(CodecError::SchemaMismatch { expected: 6, found: 4 })
        ));
    }

    #[test]
    fn short_and_unmagic_frames_are_invalid() {
        let codec = codec();
        assert!(matches!(
            codec.inspect_envelope(&[0, 0]),
            Err(CodecError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            codec.inspect_envelope(br#"{"station_id":1}"#),
            Err(CodecError::InvalidEnvelope(_))
        ));
        assert!(matches!(
            codec.inspect_envelope(&[0, 0, 0, 0, 99]),
            Err(CodecError::UnknownSchema(99))
        ));
    }

    #[test]
    fn record_not_matching_schema_is_not_encoded() {
        #[derive(Serialize)]
        struct Partial {
            temperature: f64,
        }

        let codec = codec();
        let pair = codec.pair_for::<WeatherReadings>().unwrap();
        let result = codec.encode(&Partial { temperature: 3.0 }, &pair.value);
        assert!(matches!(result, Err(CodecError::SchemaViolation { .. })));
    }

    #[test]
    fn corrupt_payload_is_a_payload_error() {
        let codec = codec();
        let mut bytes = codec
            .encode_value::<WeatherReadings>(&WeatherEvent {
                temperature: 61.0,
                status: "sunny".to_string(),
            })
            .unwrap();
        bytes.truncate(HEADER_LEN + 2);

        let result = codec.decode_value::<WeatherReadings>(&bytes);
        assert!(matches!(result, Err(CodecError::MsgPackDecode(_))));
    }
}
