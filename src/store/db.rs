//! SQLite-backed document store.
//!
//! One `documents` table holds every collection: `(collection, id)`
//! primary key, JSON fields as text. Equality filters compile to
//! `json_extract` predicates; batch application runs inside a single SQL
//! transaction, so a failed batch rolls back completely and the atomic
//! per-batch contract of [`DocumentStore::apply`] holds.

use sqlx::{
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
    Pool, QueryBuilder, Row,
};
use std::future::Future;
use std::path::Path;

use serde_json::Value;

use crate::{
    document::{DocId, Document, FieldMap},
    error::RegieError,
    store::{apply_field_ops, Direction, DocumentStore, Query, WriteBatch, WriteOp},
};

/// Open (creating if missing) the document database at `path`.
pub async fn db_init<P: AsRef<Path>>(path: P) -> Result<Pool<Sqlite>, RegieError> {
    let options = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS documents ( \
            collection TEXT NOT NULL, \
            id TEXT NOT NULL, \
            fields TEXT NOT NULL, \
            PRIMARY KEY (collection, id) \
        )",
    )
    .execute(&pool)
    .await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct SqliteStore(pub Pool<Sqlite>);

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegieError> {
        Ok(SqliteStore(db_init(path).await?))
    }

    async fn get_inner(
        &self,
        collection: &str,
        id: &DocId,
    ) -> Result<Option<Document>, RegieError> {
        let row = sqlx::query("SELECT fields FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id.as_str())
            .fetch_optional(&self.0)
            .await?;
        match row {
            Some(row) => {
                let fields_json: String = row.try_get("fields")?;
                Ok(Some(Document {
                    id: id.clone(),
                    fields: serde_json::from_str(&fields_json)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn query_inner(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, RegieError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT id, fields FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        for (field, value) in &query.filters {
            qb.push(format!(" AND json_extract(fields, '{}') = ", json_path(field)));
            push_scalar_bind(&mut qb, value)?;
        }
        if let Some((field, direction)) = &query.order_by {
            qb.push(format!(
                " ORDER BY json_extract(fields, '{}') {}",
                json_path(field),
                match direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                }
            ));
        }
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
            qb.push(" OFFSET ");
            qb.push_bind(query.offset as i64);
        } else if query.offset > 0 {
            // SQLite requires a LIMIT clause before OFFSET; -1 means
            // unbounded.
            qb.push(" LIMIT -1 OFFSET ");
            qb.push_bind(query.offset as i64);
        }

        let built = qb.build();
        let sql = built.sql().to_string();
        let rows = built.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!("SQL error processing document query '{sql}': {e}");
            RegieError::from(e)
        })?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let fields_json: String = row.try_get("fields")?;
            results.push(Document {
                id: DocId(id),
                fields: serde_json::from_str(&fields_json)?,
            });
        }
        Ok(results)
    }

    async fn apply_inner(&self, batch: WriteBatch) -> Result<(), RegieError> {
        batch.check_limit()?;
        let mut tx = self.0.begin().await?;
        for op in batch.ops {
            match op {
                WriteOp::Put {
                    collection,
                    document,
                } => {
                    sqlx::query(
                        "INSERT OR REPLACE INTO documents (collection, id, fields) \
                         VALUES (?1, ?2, ?3)",
                    )
                    .bind(&collection)
                    .bind(document.id.as_str())
                    .bind(serde_json::to_string(&document.fields)?)
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Update {
                    collection,
                    id,
                    ops,
                } => {
                    let row = sqlx::query(
                        "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                    )
                    .bind(&collection)
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                    let Some(row) = row else {
                        // Dropping the transaction rolls back the batch.
                        return Err(RegieError::NotFound(format!(
                            "document {collection}/{id} does not exist"
                        )));
                    };
                    let fields_json: String = row.try_get("fields")?;
                    let mut fields: FieldMap = serde_json::from_str(&fields_json)?;
                    apply_field_ops(&mut fields, &ops);
                    sqlx::query(
                        "UPDATE documents SET fields = ?3 WHERE collection = ?1 AND id = ?2",
                    )
                    .bind(&collection)
                    .bind(id.as_str())
                    .bind(serde_json::to_string(&fields)?)
                    .execute(&mut *tx)
                    .await?;
                }
                WriteOp::Delete { collection, id } => {
                    sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
                        .bind(&collection)
                        .bind(id.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// JSON path for a top-level field, quoted for the SQL literal.
fn json_path(field: &str) -> String {
    format!("$.{}", field.replace('\'', "''"))
}

/// Bind a JSON scalar for comparison against `json_extract` output.
fn push_scalar_bind(
    qb: &mut QueryBuilder<Sqlite>,
    value: &Value,
) -> Result<(), RegieError> {
    match value {
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                qb.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                qb.push_bind(f);
            } else {
                return Err(RegieError::Command(format!(
                    "unsupported numeric filter value: {n}"
                )));
            }
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        other => {
            return Err(RegieError::Command(format!(
                "equality filters support scalar values only, got: {other}"
            )));
        }
    }
    Ok(())
}

impl DocumentStore for SqliteStore {
    fn get(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<Option<Document>, RegieError>> + Send {
        self.get_inner(collection, id)
    }

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, RegieError>> + Send {
        self.query_inner(collection, query)
    }

    fn apply(&self, batch: WriteBatch) -> impl Future<Output = Result<(), RegieError>> + Send {
        self.apply_inner(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldOp;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("documents.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let doc = Document::new("v1")
            .with_field("name", "Great Hall")
            .with_field("capacity", 650);
        store.put("venues", doc.clone()).await.unwrap();

        let loaded = store.get("venues", &DocId::from("v1")).await.unwrap();
        assert_eq!(loaded, Some(doc));
        assert_eq!(store.get("venues", &DocId::from("v2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_filters_order_and_paginate() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for (id, org, capacity) in [
            ("v1", "org-a", 300),
            ("v2", "org-a", 100),
            ("v3", "org-b", 200),
        ] {
            store
                .put(
                    "venues",
                    Document::new(id)
                        .with_field("organizationId", org)
                        .with_field("capacity", capacity),
                )
                .await
                .unwrap();
        }

        let query = Query::all()
            .filter("organizationId", "org-a")
            .order_by("capacity", Direction::Ascending);
        let results = store.query("venues", &query).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);

        let page = store
            .query("venues", &query.clone().offset(1).limit(5))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id.as_str(), "v1");
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_completely() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.put("venues", Document::new("v1")).await.unwrap();

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

        let v1 = store
            .get("venues", &DocId::from("v1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v1.str_field("name"), None);
    }

    #[tokio::test]
    async fn array_ops_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.put("artists", Document::new("a1")).await.unwrap();
            for _ in 0..2 {
                store
                    .update(
                        "artists",
                        DocId::from("a1"),
                        vec![FieldOp::ArrayUnionId {
                            field: "bookingIds".to_string(),
                            value: json!("b1"),
                        }],
                    )
                    .await
                    .unwrap();
            }
        }
        let store = open_store(&dir).await;
        let artist = store
            .get("artists", &DocId::from("a1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artist.fields["bookingIds"], json!(["b1"]));
    }
}
