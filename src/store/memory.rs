//! In-process document store.
//!
//! Collections live in a `BTreeMap` behind a `parking_lot` read-write
//! lock. Batch application validates every operation against current
//! state before mutating anything, so a rejected batch leaves the store
//! untouched and `apply` stays atomic per batch.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::{ready, Future};

use crate::{
    document::{DocId, Document},
    error::RegieError,
    store::{apply_field_ops, value_cmp, DocumentStore, Query, WriteBatch, WriteOp},
};

type Collections = BTreeMap<String, BTreeMap<DocId, Document>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Bulk-load fixtures without batch-limit accounting.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        let mut collections = self.collections.write();
        let entries = collections.entry(collection.to_string()).or_default();
        for doc in documents {
            entries.insert(doc.id.clone(), doc);
        }
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Snapshot of a collection in id order.
    pub fn dump(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get_sync(&self, collection: &str, id: &DocId) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|entries| entries.get(id))
            .cloned()
    }

    fn query_sync(&self, collection: &str, query: &Query) -> Vec<Document> {
        let collections = self.collections.read();
        let mut results: Vec<Document> = collections
            .get(collection)
            .map(|entries| {
                entries
                    .values()
                    .filter(|doc| query.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some((field, direction)) = &query.order_by {
            results.sort_by(|a, b| {
                let ordering = value_cmp(a.fields.get(field), b.fields.get(field));
                match direction {
                    super::Direction::Ascending => ordering,
                    super::Direction::Descending => ordering.reverse(),
                }
            });
        }
        let results: Vec<Document> = results.into_iter().skip(query.offset).collect();
        match query.limit {
            Some(limit) => results.into_iter().take(limit).collect(),
            None => results,
        }
    }

    fn apply_sync(&self, batch: WriteBatch) -> Result<(), RegieError> {
        batch.check_limit()?;
        let mut collections = self.collections.write();

        // Validation pass: every update target must exist right now.
        for op in &batch.ops {
            if let WriteOp::Update { collection, id, .. } = op {
                let exists = collections
                    .get(collection)
                    .is_some_and(|entries| entries.contains_key(id));
                if !exists {
                    return Err(RegieError::NotFound(format!(
                        "document {collection}/{id} does not exist"
                    )));
                }
            }
        }

        for op in batch.ops {
            match op {
                WriteOp::Put {
                    collection,
                    document,
                } => {
                    collections
                        .entry(collection)
                        .or_default()
                        .insert(document.id.clone(), document);
                }
                WriteOp::Update {
                    collection,
                    id,
                    ops,
                } => {
                    if let Some(doc) = collections
                        .get_mut(&collection)
                        .and_then(|entries| entries.get_mut(&id))
                    {
                        apply_field_ops(&mut doc.fields, &ops);
                    }
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(entries) = collections.get_mut(&collection) {
                        entries.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<Option<Document>, RegieError>> + Send {
        ready(Ok(self.get_sync(collection, id)))
    }

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, RegieError>> + Send {
        ready(Ok(self.query_sync(collection, query)))
    }

    fn apply(&self, batch: WriteBatch) -> impl Future<Output = Result<(), RegieError>> + Send {
        ready(self.apply_sync(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Direction, FieldOp};
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn query_filters_orders_and_paginates() {
        let store = MemoryStore::new();
        store.seed(
            "venues",
            vec![
                Document::new("v1")
                    .with_field("organizationId", "org-a")
                    .with_field("capacity", 300),
                Document::new("v2")
                    .with_field("organizationId", "org-a")
                    .with_field("capacity", 100),
                Document::new("v3")
                    .with_field("organizationId", "org-b")
                    .with_field("capacity", 200),
            ],
        );

        let query = Query::all()
            .filter("organizationId", "org-a")
            .order_by("capacity", Direction::Descending);
        let results = store.query("venues", &query).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, DocId::from("v1"));
        assert_eq!(results[1].id, DocId::from("v2"));

        let page = store
            .query("venues", &query.clone().offset(1).limit(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, DocId::from("v2"));
    }

    #[test_log::test(tokio::test)]
    async fn update_of_missing_document_fails_without_side_effects() {
        let store = MemoryStore::new();
        store.seed("venues", vec![Document::new("v1")]);

        let mut batch = WriteBatch::new();
        batch.update(
            "venues",
            DocId::from("v1"),
            vec![FieldOp::Set("name".to_string(), json!("Hall"))],
        );
        batch.update(
            "venues",
            DocId::from("ghost"),
            vec![FieldOp::Set("name".to_string(), json!("Nowhere"))],
        );
        let err = store.apply(batch).await.unwrap_err();
        assert!(err.is_not_found());

        // The failed batch must not have applied its first operation.
        let v1 = store.get("venues", &DocId::from("v1")).await.unwrap();
        assert_eq!(v1.unwrap().str_field("name"), None);
    }
}
