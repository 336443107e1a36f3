//! Schemaless document envelope and typed field access.
//!
//! Every persisted entity is a [`Document`]: an id plus a JSON field map,
//! partitioned into named collections by the store. Field names follow the
//! persisted camelCase wire shapes (`artistId`, `contactIds`,
//! `organizationId`, ...). Helpers here centralize the few dynamic-typing
//! concessions the domain requires, most notably reference lists that may
//! hold plain id strings or lightweight summary objects keyed by `"id"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// JSON field map of a document.
pub type FieldMap = Map<String, Value>;

/// Tenant scope field present on every collection.
pub const FIELD_ORG: &str = "organizationId";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Document identifier within a collection.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct DocId(pub String);

impl DocId {
    /// Fresh random identifier for a newly created document.
    pub fn generate() -> Self {
        DocId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId(s.to_string())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(s)
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant (organization) identifier.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        OrgId(s.to_string())
    }
}

impl Display for OrgId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored document: id plus schemaless JSON fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    pub id: DocId,
    pub fields: FieldMap,
}

impl Document {
    pub fn new(id: impl Into<DocId>) -> Self {
        Document {
            id: id.into(),
            fields: FieldMap::new(),
        }
    }

    /// Builder-style field insertion, mostly for fixtures and tests.
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// A single-valued reference field. Null and empty strings read as
    /// absent, matching how forms persist cleared selections.
    pub fn id_field(&self, name: &str) -> Option<DocId> {
        self.str_field(name)
            .filter(|s| !s.is_empty())
            .map(DocId::from)
    }

    /// A multi-valued reference field. Accepts both persisted shapes: an
    /// array of id strings, or an array of summary objects carrying an
    /// `"id"` key. Elements without an identity are ignored.
    pub fn id_list_field(&self, name: &str) -> Vec<DocId> {
        match self.fields.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(element_identity)
                .map(DocId::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Length of an array field, zero when absent or not an array.
    pub fn array_len(&self, name: &str) -> usize {
        match self.fields.get(name) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    pub fn org_id(&self) -> Option<OrgId> {
        self.str_field(FIELD_ORG)
            .filter(|s| !s.is_empty())
            .map(|s| OrgId(s.to_string()))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(FIELD_CREATED_AT)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(FIELD_UPDATED_AT)
    }

    fn timestamp_field(&self, name: &str) -> Option<DateTime<Utc>> {
        self.str_field(name)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Human-readable label for operator reports: the first non-empty of
    /// the configured name fields, then a first/last name pair, then the
    /// document id.
    pub fn display_name(&self, name_fields: &[String]) -> String {
        for field in name_fields {
            if let Some(value) = self.str_field(field) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
        let first = self.str_field("firstName").unwrap_or_default().trim();
        let last = self.str_field("lastName").unwrap_or_default().trim();
        let joined = format!("{first} {last}");
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
        self.id.to_string()
    }
}

/// Identity of a reference-list element: the string itself for id entries,
/// the `"id"` key for summary objects. Other shapes have no identity.
pub fn element_identity(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        _ => None,
    }
}

/// RFC 3339 timestamp value for persisted `createdAt`/`updatedAt` fields.
pub fn timestamp_value(t: DateTime<Utc>) -> Value {
    Value::String(t.to_rfc3339())
}

pub fn now_value() -> Value {
    timestamp_value(Utc::now())
}
