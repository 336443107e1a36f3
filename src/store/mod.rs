//! Document store abstraction.
//!
//! The engine treats its backing store as a generic document database:
//! named collections of JSON documents, queried by field equality with
//! optional ordering and limit/offset, written through atomic batches of
//! bounded size. [`MemoryStore`](memory::MemoryStore) is the bundled
//! in-process implementation; the `service` feature adds a SQLite-backed
//! one. Anything richer (field-missing predicates, membership tests) is
//! evaluated client-side by the callers.
//!
//! No optimistic concurrency is provided: updates carry no version token
//! and the last write wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::future::Future;

use crate::{
    document::{element_identity, DocId, Document, FieldMap, FIELD_ORG},
    error::RegieError,
    OrgId,
};

pub mod memory;

#[cfg(feature = "service")]
pub mod db;

/// Per-commit write limit of the store. Corrective operations split their
/// work into chunks at most this large and commit them sequentially.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Equality-filter query with optional ordering and pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    /// Every document of a collection.
    pub fn all() -> Self {
        Query::default()
    }

    /// Every document of a collection belonging to one tenant.
    pub fn scoped(org: &OrgId) -> Self {
        Query::all().filter(FIELD_ORG, org.as_str())
    }

    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Filter predicate, shared by in-process stores.
    pub(crate) fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, value)| doc.fields.get(field) == Some(value))
    }
}

/// Total order over JSON scalars for `ORDER BY` semantics: null, then
/// booleans, then numbers, then strings; arrays and objects last. Absent
/// fields sort before any present value.
pub(crate) fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            (Value::Number(l), Value::Number(r)) => l
                .as_f64()
                .partial_cmp(&r.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(l), Value::String(r)) => l.cmp(r),
            _ => rank(x).cmp(&rank(y)),
        },
    }
}

/// Field-level mutation applied by an [`WriteOp::Update`].
///
/// The array operations are identity-aware so that inverse reference
/// lists work in both persisted shapes, id strings and summary objects:
/// identity is the string itself or the object's `"id"` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldOp {
    Set(String, Value),
    Clear(String),
    /// Append `value` unless an element with the same identity is already
    /// present. A missing or non-array field becomes a one-element array.
    ArrayUnionId { field: String, value: Value },
    /// Remove every element whose identity equals `id`.
    ArrayRemoveId { field: String, id: DocId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Put {
        collection: String,
        document: Document,
    },
    Update {
        collection: String,
        id: DocId,
        ops: Vec<FieldOp>,
    },
    Delete {
        collection: String,
        id: DocId,
    },
}

/// Ordered list of writes applied atomically by one store commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, collection: &str, document: Document) -> &mut Self {
        self.ops.push(WriteOp::Put {
            collection: collection.to_string(),
            document,
        });
        self
    }

    pub fn update(&mut self, collection: &str, id: DocId, ops: Vec<FieldOp>) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id,
            ops,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: DocId) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.to_string(),
            id,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Stores call this before committing; oversized batches are rejected
    /// rather than truncated.
    pub fn check_limit(&self) -> Result<(), RegieError> {
        if self.ops.len() > MAX_BATCH_WRITES {
            return Err(RegieError::BatchLimit {
                staged: self.ops.len(),
                limit: MAX_BATCH_WRITES,
            });
        }
        Ok(())
    }
}

/// Apply field mutations to a document's field map. Shared by store
/// implementations so update semantics cannot drift between them.
pub fn apply_field_ops(fields: &mut FieldMap, ops: &[FieldOp]) {
    for op in ops {
        match op {
            FieldOp::Set(name, value) => {
                fields.insert(name.clone(), value.clone());
            }
            FieldOp::Clear(name) => {
                fields.remove(name);
            }
            FieldOp::ArrayUnionId { field, value } => match fields.get_mut(field) {
                Some(Value::Array(items)) => {
                    let present = element_identity(value).is_some_and(|id| {
                        items
                            .iter()
                            .any(|existing| element_identity(existing) == Some(id))
                    });
                    if !present {
                        items.push(value.clone());
                    }
                }
                _ => {
                    fields.insert(field.clone(), Value::Array(vec![value.clone()]));
                }
            },
            FieldOp::ArrayRemoveId { field, id } => {
                if let Some(Value::Array(items)) = fields.get_mut(field) {
                    items.retain(|existing| element_identity(existing) != Some(id.as_str()));
                }
            }
        }
    }
}

/// Async document store interface.
///
/// `apply` commits one batch atomically. There is no transaction spanning
/// batches and no compare-and-swap on updates; concurrent writers race
/// with last-write-wins semantics.
pub trait DocumentStore: Send + Sync {
    fn get(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<Option<Document>, RegieError>> + Send;

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, RegieError>> + Send;

    fn apply(&self, batch: WriteBatch) -> impl Future<Output = Result<(), RegieError>> + Send;

    fn put(
        &self,
        collection: &str,
        document: Document,
    ) -> impl Future<Output = Result<(), RegieError>> + Send {
        let mut batch = WriteBatch::new();
        batch.put(collection, document);
        self.apply(batch)
    }

    /// Update a single document; fails with `NotFound` when it no longer
    /// exists.
    fn update(
        &self,
        collection: &str,
        id: DocId,
        ops: Vec<FieldOp>,
    ) -> impl Future<Output = Result<(), RegieError>> + Send {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, ops);
        self.apply(batch)
    }

    fn delete(
        &self,
        collection: &str,
        id: DocId,
    ) -> impl Future<Output = Result<(), RegieError>> + Send {
        let mut batch = WriteBatch::new();
        batch.delete(collection, id);
        self.apply(batch)
    }
}
