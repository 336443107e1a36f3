//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::future::Future;

use regie_core::{
    document::{DocId, Document},
    error::RegieError,
    store::{memory::MemoryStore, DocumentStore, Query, WriteBatch, WriteOp},
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times — subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A booking document with the conventional camelCase fields.
#[allow(dead_code)]
pub fn booking_doc(id: &str, org: &str, title: &str) -> Document {
    Document::new(id)
        .with_field("title", title)
        .with_field("organizationId", org)
        .with_field("createdAt", "2024-01-01T00:00:00Z")
}

#[allow(dead_code)]
pub fn named_doc(id: &str, org: &str, name: &str, created_at: &str) -> Document {
    Document::new(id)
        .with_field("name", name)
        .with_field("organizationId", org)
        .with_field("createdAt", created_at)
}

#[allow(dead_code)]
pub fn liaison_doc(id: &str, org: &str, parent: &str, person: &str) -> Document {
    Document::new(id)
        .with_field("parentId", parent)
        .with_field("personId", person)
        .with_field("active", true)
        .with_field("organizationId", org)
        .with_field("createdAt", "2024-01-01T00:00:00Z")
}

/// Store wrapper that fails every batch containing an update to
/// `fail_collection`, for exercising the non-fatal-warning and
/// abort-before-delete paths.
#[allow(dead_code)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_collection: String,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: MemoryStore, fail_collection: &str) -> Self {
        FailingStore {
            inner,
            fail_collection: fail_collection.to_string(),
        }
    }
}

impl DocumentStore for FailingStore {
    fn get(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<Option<Document>, RegieError>> + Send {
        self.inner.get(collection, id)
    }

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, RegieError>> + Send {
        self.inner.query(collection, query)
    }

    fn apply(&self, batch: WriteBatch) -> impl Future<Output = Result<(), RegieError>> + Send {
        let fail = batch.ops.iter().any(|op| {
            matches!(op, WriteOp::Update { collection, .. } if collection == &self.fail_collection)
        });
        async move {
            if fail {
                return Err(RegieError::Store("injected write failure".to_string()));
            }
            self.inner.apply(batch).await
        }
    }
}
