//! The narrow interface to the search/index engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::query::QueryPlan;

pub mod memory;

pub use memory::MemoryBackend;

const MAPPING_JSON: &str = include_str!("../resources/mapping.json");

/// Field types understood by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    Double,
    Boolean,
    Date,
    Object,
    Nested,
}

#[derive(Deserialize)]
struct PropertyDefinition {
    #[serde(rename = "type")]
    kind: Option<FieldType>,
    #[serde(default)]
    fields: BTreeMap<String, PropertyDefinition>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyDefinition>,
}

#[derive(Deserialize)]
struct MappingDefinition {
    properties: BTreeMap<String, PropertyDefinition>,
}

/// An index mapping: the raw definition plus a flattened field table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    definition: Value,
    /// Dotted path to type, including multi-fields such as `title.raw`.
    fields: BTreeMap<String, FieldType>,
    /// Multi-field path to the source path it reads, e.g. `title.raw` to `title`.
    multi_fields: BTreeMap<String, String>,
}

impl Mapping {
    /// The mapping bundled with this build.
    pub fn bundled() -> Result<Self> {
        Self::from_json(MAPPING_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let definition: Value = serde_json::from_str(json)?;
        let parsed = MappingDefinition::deserialize(&definition)
            .map_err(|e| Error::Internal(format!("invalid index mapping: {e}")))?;

        let mut mapping = Self {
            definition,
            fields: BTreeMap::new(),
            multi_fields: BTreeMap::new(),
        };
        mapping.flatten("", &parsed.properties);
        Ok(mapping)
    }

    fn flatten(&mut self, prefix: &str, properties: &BTreeMap<String, PropertyDefinition>) {
        for (name, property) in properties {
            let path = format!("{prefix}{name}");
            let kind = property.kind.unwrap_or(FieldType::Object);
            self.fields.insert(path.clone(), kind);
            for (sub, field) in &property.fields {
                let sub_path = format!("{path}.{sub}");
                self.fields
                    .insert(sub_path.clone(), field.kind.unwrap_or(FieldType::Keyword));
                self.multi_fields.insert(sub_path, path.clone());
            }
            self.flatten(&format!("{path}."), &property.properties);
        }
    }

    /// SHA-256 of the canonical definition.
    pub fn fingerprint(&self) -> String {
        let canonical = self.definition.to_string();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn definition(&self) -> &Value {
        &self.definition
    }

    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied()
    }

    /// The document path a field reads its value from.
    pub fn source_path<'a>(&'a self, path: &'a str) -> &'a str {
        self.multi_fields.get(path).map_or(path, String::as_str)
    }

    /// Check a document body against the field types.
    ///
    /// Unmapped fields are accepted as-is; `null` is valid for every field.
    pub fn validate(&self, document: &Value) -> std::result::Result<(), String> {
        let Value::Object(map) = document else {
            return Err("document must be a JSON object".to_string());
        };
        for (key, value) in map {
            self.validate_field(key, value)?;
        }
        Ok(())
    }

    fn validate_field(&self, path: &str, value: &Value) -> std::result::Result<(), String> {
        let Some(kind) = self.field_type(path) else {
            return Ok(());
        };
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for value in values {
            if value.is_null() {
                continue;
            }
            let valid = match kind {
                FieldType::Text | FieldType::Keyword => value.is_string(),
                FieldType::Long => value.is_i64() || value.is_u64(),
                FieldType::Double => value.is_number(),
                FieldType::Boolean => value.is_boolean(),
                FieldType::Date => value.as_str().is_some_and(|s| parse_date(s).is_some()),
                FieldType::Object | FieldType::Nested => match value {
                    Value::Object(map) => {
                        for (key, inner) in map {
                            self.validate_field(&format!("{path}.{key}"), inner)?;
                        }
                        true
                    }
                    _ => false,
                },
            };
            if !valid {
                return Err(format!("field '{path}' is not a valid {kind:?}: {value}"));
            }
        }
        Ok(())
    }
}

/// Parse a stored date, either a timestamp or a calendar date at UTC midnight.
pub fn parse_date(value: &str) -> Option<jiff::Timestamp> {
    if let Ok(timestamp) = value.parse::<jiff::Timestamp>() {
        return Some(timestamp);
    }
    value
        .parse::<jiff::civil::Date>()
        .ok()?
        .to_zoned(jiff::tz::TimeZone::UTC)
        .ok()
        .map(|zoned| zoned.timestamp())
}

/// A document to index under `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkDocument {
    pub id: String,
    pub body: Value,
}

/// Outcome for one document of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemResult {
    pub id: String,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    /// Number of matching documents, before paging.
    pub total: u64,
    pub hits: Vec<Hit>,
    pub aggregations: BTreeMap<String, Vec<Bucket>>,
}

/// Search/index engine operations used by the lifecycle manager and search layer.
///
/// Index names and aliases share one namespace. `query` accepts either.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Identifies the engine build; part of every snapshot's fingerprints.
    fn engine_fingerprint(&self) -> String;

    /// Create an empty index with `mapping`.
    async fn create_index(&self, name: &str, mapping: &Mapping) -> Result<()>;

    /// Index documents, reporting the outcome per document.
    async fn bulk_index(&self, name: &str, documents: Vec<BulkDocument>) -> Result<Vec<BulkItemResult>>;

    /// Run a planned query against an index or alias.
    async fn query(&self, index: &str, plan: &QueryPlan) -> Result<QueryResponse>;

    /// Atomically point `alias` at `to`, provided it currently points at `from`.
    async fn alias_swap(&self, alias: &str, from: Option<&str>, to: &str) -> Result<()>;

    /// Delete an index; aliased indices cannot be deleted.
    async fn delete_index(&self, name: &str) -> Result<()>;

    /// The index `alias` points at, if any.
    async fn alias_target(&self, alias: &str) -> Result<Option<String>>;
}
