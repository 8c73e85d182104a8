//! Record schemas and the registry that holds them.
//!
//! Schemas are JSON documents in a compact Avro-like dialect:
//!
//! ```json
//! {"id": 2, "name": "arrival.value", "version": 1, "type": "record",
//!  "fields": [{"name": "station_id", "type": "long"},
//!             {"name": "prev_direction", "type": ["null", "string"]}]}
//! ```
//!
//! A record kind is bound to the pair `<subject>.key` / `<subject>.value`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::CodecError;
use crate::domain::records::RecordKind;

const BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    (
        "arrival_key.json",
        include_str!("../../../schemas/arrival_key.json"),
    ),
    (
        "arrival_value.json",
        include_str!("../../../schemas/arrival_value.json"),
    ),
    (
        "turnstile_key.json",
        include_str!("../../../schemas/turnstile_key.json"),
    ),
    (
        "turnstile_value.json",
        include_str!("../../../schemas/turnstile_value.json"),
    ),
    (
        "weather_key.json",
        include_str!("../../../schemas/weather_key.json"),
    ),
    (
        "weather_value.json",
        include_str!("../../../schemas/weather_value.json"),
    ),
];

// =============================================================================
// Field Types
// =============================================================================

/// Type of a single record field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawFieldType")]
pub enum FieldType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    String,
    /// `["null", T]` union.
    Nullable(Box<FieldType>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldType {
    Name(String),
    Union(Vec<String>),
}

impl FieldType {
    fn primitive(name: &str) -> Result<Self, String> {
        match name {
            "int" => Ok(Self::Int),
            "long" => Ok(Self::Long),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            other => Err(format!("unsupported field type `{other}`")),
        }
    }

    /// Whether `value` is an instance of this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Int => value
                .as_i64()
                .is_some_and(|v| i32::try_from(v).is_ok()),
            Self::Long => value.is_i64() || value.as_u64().is_some_and(|v| i64::try_from(v).is_ok()),
            Self::Float | Self::Double => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::String => value.is_string(),
            Self::Nullable(inner) => value.is_null() || inner.accepts(value),
        }
    }
}

impl TryFrom<RawFieldType> for FieldType {
    type Error = String;

    fn try_from(raw: RawFieldType) -> Result<Self, Self::Error> {
        match raw {
            RawFieldType::Name(name) => Self::primitive(&name),
            RawFieldType::Union(branches) => match branches.as_slice() {
                [null, inner] if null == "null" => {
                    Ok(Self::Nullable(Box::new(Self::primitive(inner)?)))
                }
                _ => Err(format!("unsupported union {branches:?}")),
            },
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// One named field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// A versioned record schema.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Schema {
    /// Registry id, written into every envelope.
    pub id: u32,
    /// Subject, e.g. `arrival.value`.
    pub name: String,
    /// Schema version.
    pub version: u32,
    /// Record fields.
    pub fields: Vec<SchemaField>,
    #[serde(rename = "type")]
    kind: String,
}

impl Schema {
    /// Parse a schema document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSchema`] if the document is malformed or
    /// is not a record schema.
    pub fn parse(document: &str) -> Result<Self, CodecError> {
        let schema: Self = serde_json::from_str(document)
            .map_err(|e| CodecError::InvalidSchema(e.to_string()))?;
        if schema.kind != "record" {
            return Err(CodecError::InvalidSchema(format!(
                "{}: expected type `record`, found `{}`",
                schema.name, schema.kind
            )));
        }
        Ok(schema)
    }

    /// Check a JSON rendering of a record against the field list.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaViolation`] naming the first offending
    /// field.
    pub fn validate(&self, record: &Value) -> Result<(), CodecError> {
        let violation = |reason: String| CodecError::SchemaViolation {
            schema: self.name.clone(),
            reason,
        };

        let Some(object) = record.as_object() else {
            return Err(violation("record is not an object".to_string()));
        };

        for field in &self.fields {
            let value = object.get(&field.name).unwrap_or(&Value::Null);
            if !field.field_type.accepts(value) {
                return Err(violation(format!(
                    "field `{}` expected {:?}, found {value}",
                    field.name, field.field_type
                )));
            }
        }

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.fields.iter().any(|f| &f.name == *key))
        {
            return Err(violation(format!("unknown field `{unknown}`")));
        }
        Ok(())
    }
}

/// Key and value schemas for one record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPair {
    /// Key schema.
    pub key: Schema,
    /// Value schema.
    pub value: Schema,
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable set of schema pairs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    pairs: HashMap<RecordKind, Arc<SchemaPair>>,
    by_id: HashMap<u32, Schema>,
}

impl SchemaRegistry {
    /// Registry of the schemas compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if a bundled schema is malformed.
    pub fn builtin() -> Result<Self, CodecError> {
        let schemas = BUILTIN_SCHEMAS
            .iter()
            .map(|(_, document)| Schema::parse(document))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_schemas(schemas)
    }

    /// Load every `*.json` schema in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read, a document is
    /// malformed, or a record kind is missing its key or value schema.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CodecError> {
        let mut schemas = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let document = std::fs::read_to_string(&path)?;
                schemas.push(Schema::parse(&document)?);
            }
        }
        tracing::debug!(
            dir = %dir.as_ref().display(),
            count = schemas.len(),
            "Loaded schema documents"
        );
        Self::from_schemas(schemas)
    }

    /// Assemble a registry from parsed schemas.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate ids or an incomplete pair.
    pub fn from_schemas(schemas: Vec<Schema>) -> Result<Self, CodecError> {
        let mut by_id = HashMap::with_capacity(schemas.len());
        let mut by_name = HashMap::with_capacity(schemas.len());
        for schema in schemas {
            if by_id.contains_key(&schema.id) {
                return Err(CodecError::DuplicateSchemaId(schema.id));
            }
            by_name.insert(schema.name.clone(), schema.clone());
            by_id.insert(schema.id, schema);
        }

        let mut pairs = HashMap::new();
        for kind in RecordKind::all() {
            let lookup = |part: &str| {
                let subject = format!("{}.{part}", kind.subject());
                by_name
                    .get(&subject)
                    .cloned()
                    .ok_or(CodecError::MissingSchema(subject))
            };
            let pair = SchemaPair {
                key: lookup("key")?,
                value: lookup("value")?,
            };
            pairs.insert(*kind, Arc::new(pair));
        }

        Ok(Self { pairs, by_id })
    }

    /// Schema pair for a record kind.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingSchema`] if the kind was not loaded.
    pub fn pair(&self, kind: RecordKind) -> Result<Arc<SchemaPair>, CodecError> {
        self.pairs
            .get(&kind)
            .cloned()
            .ok_or_else(|| CodecError::MissingSchema(kind.subject().to_string()))
    }

    /// Look up a schema by id.
    #[must_use]
    pub fn by_id(&self, id: u32) -> Option<&Schema> {
        self.by_id.get(&id)
    }
}
