//! Corrective batch operations.
//!
//! Every repair is two-phase: a `plan_*` function reads current state
//! and returns an inspectable plan, and an `apply_*` function executes
//! that plan only after the caller confirmed it. Writes are chunked to
//! the store's per-commit limit and committed sequentially, with
//! cumulative progress emitted after each commit. There is no cross-batch
//! transaction: whatever committed before a failure stays applied, and a
//! fresh plan after the failure covers exactly the remainder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use crate::{
    config::ConsistencyConfig,
    document::{now_value, DocId, Document, OrgId, FIELD_ORG, FIELD_UPDATED_AT},
    error::RegieError,
    event::{Progress, RepairEvent},
    store::{DocumentStore, FieldOp, Query, WriteBatch},
};

/// One document lacking the tenant scope field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeEntry {
    pub collection: String,
    pub id: DocId,
    pub display_name: String,
}

/// Plan for stamping a tenant id onto unscoped documents.
///
/// Inherently ambiguous when more than one tenant's unscoped data is
/// colocated: the scan cannot distinguish ownership. This is an
/// emergency repair tool, gated on explicit operator confirmation, not a
/// safe general operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopePlan {
    pub organization_id: OrgId,
    pub entries: Vec<ScopeEntry>,
}

impl ScopePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Find every document in `collections`, across all tenants, lacking
/// the `organizationId` field.
pub async fn plan_missing_scope<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    collections: &[String],
) -> Result<ScopePlan, RegieError> {
    let mut entries = Vec::new();
    for collection in collections {
        let docs = store.query(collection, &Query::all()).await?;
        let before = entries.len();
        for doc in &docs {
            // The store cannot express "field missing", so the scan
            // fetches everything and filters here.
            if doc.org_id().is_none() {
                entries.push(ScopeEntry {
                    collection: collection.clone(),
                    id: doc.id.clone(),
                    display_name: doc.display_name(&config.name_fields),
                });
            }
        }
        tracing::info!(
            collection = collection.as_str(),
            unscoped = entries.len() - before,
            total = docs.len(),
            "scope scan"
        );
    }
    Ok(ScopePlan {
        organization_id: org.clone(),
        entries,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFixSummary {
    pub stamped: usize,
    pub total: usize,
    pub batches: usize,
}

/// Stamp the plan's tenant id onto every planned document.
///
/// Batches commit sequentially; after a mid-run failure the emitted
/// progress reflects exactly what succeeded and a re-plan finds the
/// remaining unscoped documents.
pub async fn apply_missing_scope<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    plan: &ScopePlan,
    progress: &Progress,
) -> Result<ScopeFixSummary, RegieError> {
    let total = plan.entries.len();
    let mut summary = ScopeFixSummary {
        total,
        ..ScopeFixSummary::default()
    };
    for chunk in plan.entries.chunks(config.chunk_size()) {
        let mut batch = WriteBatch::new();
        for entry in chunk {
            batch.update(
                &entry.collection,
                entry.id.clone(),
                vec![
                    FieldOp::Set(FIELD_ORG.to_string(), json!(plan.organization_id.as_str())),
                    FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
                ],
            );
        }
        store.apply(batch).await?;
        summary.stamped += chunk.len();
        summary.batches += 1;
        progress.emit(RepairEvent::BatchCommitted {
            operation: "fix-missing-scope".to_string(),
            committed: summary.stamped,
            total,
        });
    }
    tracing::info!(
        org = %plan.organization_id,
        stamped = summary.stamped,
        batches = summary.batches,
        "tenant scope repair complete"
    );
    Ok(summary)
}

/// Deterministic principal selection for a duplicate cluster: earliest
/// `createdAt` wins, documents without a timestamp order after documents
/// with one, remaining ties break on lexicographic id.
pub fn select_principal(members: &[(DocId, Option<DateTime<Utc>>)]) -> Option<DocId> {
    members
        .iter()
        .min_by_key(|(id, created)| {
            (
                created.is_none(),
                created.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX),
                id.clone(),
            )
        })
        .map(|(id, _)| id.clone())
}

/// One referencing document and the field rewrites pointing it at the
/// principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repoint {
    pub collection: String,
    pub id: DocId,
    pub ops: Vec<FieldOp>,
}

/// Plan for collapsing a duplicate cluster onto its principal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePlan {
    pub organization_id: OrgId,
    /// Collection holding the cluster documents.
    pub collection: String,
    pub principal: DocId,
    pub principal_name: String,
    pub duplicates: Vec<DocId>,
    pub repoints: Vec<Repoint>,
}

/// Build a merge plan for a cluster of documents considered the same
/// real-world entity.
///
/// Members that no longer exist are skipped with a warning; at least two
/// must remain. Referencing documents are found in the bookings
/// collection through every relation targeting `collection`, plus
/// liaison rows when the cluster lives in the structures collection.
pub async fn plan_merge<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    collection: &str,
    member_ids: &[DocId],
) -> Result<MergePlan, RegieError> {
    let mut members = Vec::new();
    for id in member_ids {
        match store.get(collection, id).await? {
            Some(doc) => members.push(doc),
            None => {
                tracing::warn!(collection, id = %id, "cluster member no longer exists, skipping");
            }
        }
    }
    if members.len() < 2 {
        return Err(RegieError::Command(format!(
            "merge needs at least two existing documents in '{collection}', found {}",
            members.len()
        )));
    }

    let keyed: Vec<(DocId, Option<DateTime<Utc>>)> = members
        .iter()
        .map(|doc| (doc.id.clone(), doc.created_at()))
        .collect();
    let principal = match select_principal(&keyed) {
        Some(id) => id,
        None => {
            return Err(RegieError::Command(
                "merge cluster resolved to no principal".to_string(),
            ))
        }
    };
    let principal_doc = members
        .iter()
        .find(|doc| doc.id == principal)
        .cloned()
        .unwrap_or_default();
    let principal_name = principal_doc.display_name(&config.name_fields);
    let duplicates: Vec<DocId> = members
        .iter()
        .filter(|doc| doc.id != principal)
        .map(|doc| doc.id.clone())
        .collect();
    let dup_set: BTreeSet<&DocId> = duplicates.iter().collect();

    let mut repoints = Vec::new();

    // Bookings referencing a non-principal member through any relation
    // that targets the cluster's collection.
    let bookings = store
        .query(&config.collections.bookings, &Query::scoped(org))
        .await?;
    for booking in &bookings {
        let mut ops = Vec::new();
        for spec in config
            .relations
            .iter()
            .filter(|spec| spec.target_collection == collection)
        {
            if spec.multi {
                let hits: Vec<DocId> = booking
                    .id_list_field(&spec.source_field)
                    .into_iter()
                    .filter(|id| dup_set.contains(id))
                    .collect();
                if !hits.is_empty() {
                    for hit in hits {
                        ops.push(FieldOp::ArrayRemoveId {
                            field: spec.source_field.clone(),
                            id: hit,
                        });
                    }
                    ops.push(FieldOp::ArrayUnionId {
                        field: spec.source_field.clone(),
                        value: json!(principal.as_str()),
                    });
                }
                if let Some(legacy) = &spec.legacy_field {
                    if booking.id_field(legacy).is_some_and(|id| dup_set.contains(&id)) {
                        ops.push(FieldOp::Set(legacy.clone(), json!(principal.as_str())));
                    }
                }
            } else if booking
                .id_field(&spec.source_field)
                .is_some_and(|id| dup_set.contains(&id))
            {
                ops.push(FieldOp::Set(
                    spec.source_field.clone(),
                    json!(principal.as_str()),
                ));
                if let Some(name_field) = &spec.denormalized_name_field {
                    if booking.fields.contains_key(name_field) {
                        ops.push(FieldOp::Set(name_field.clone(), json!(principal_name)));
                    }
                }
            }
        }
        if !ops.is_empty() {
            ops.push(FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()));
            repoints.push(Repoint {
                collection: config.collections.bookings.clone(),
                id: booking.id.clone(),
                ops,
            });
        }
    }

    // Liaison rows hang off structures; transfer them to the principal.
    if collection == config.collections.structures {
        let liaisons = store
            .query(&config.collections.liaisons, &Query::scoped(org))
            .await?;
        for liaison in &liaisons {
            let parent = liaison.id_field("parentId");
            if parent.is_some_and(|id| dup_set.contains(&id)) {
                repoints.push(Repoint {
                    collection: config.collections.liaisons.clone(),
                    id: liaison.id.clone(),
                    ops: vec![
                        FieldOp::Set("parentId".to_string(), json!(principal.as_str())),
                        FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
                    ],
                });
            }
        }
    }

    tracing::info!(
        collection,
        principal = %principal,
        duplicates = duplicates.len(),
        repoints = repoints.len(),
        "merge plan ready"
    );
    Ok(MergePlan {
        organization_id: org.clone(),
        collection: collection.to_string(),
        principal,
        principal_name,
        duplicates,
        repoints,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub principal: DocId,
    pub repointed: usize,
    pub deleted: usize,
    pub archived: usize,
}

/// Execute a merge plan: rewrite every referencing document, then retire
/// the non-principal duplicates.
///
/// Ordering invariant: no duplicate is deleted before every repoint
/// batch committed. A repoint failure aborts the merge with all
/// duplicates still in place. Each duplicate is archived to the
/// collection's archive in the same batch as its deletion.
pub async fn apply_merge<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    plan: &MergePlan,
    progress: &Progress,
) -> Result<MergeSummary, RegieError> {
    if plan.duplicates.contains(&plan.principal) {
        return Err(RegieError::Command(
            "merge plan lists its principal among the duplicates".to_string(),
        ));
    }
    let mut summary = MergeSummary {
        principal: plan.principal.clone(),
        ..MergeSummary::default()
    };

    let total = plan.repoints.len();
    for chunk in plan.repoints.chunks(config.chunk_size()) {
        let mut batch = WriteBatch::new();
        for repoint in chunk {
            batch.update(&repoint.collection, repoint.id.clone(), repoint.ops.clone());
        }
        if let Err(err) = store.apply(batch).await {
            tracing::error!(
                principal = %plan.principal,
                committed = summary.repointed,
                total,
                error = %err,
                "repoint batch failed, aborting merge before any deletion"
            );
            return Err(err);
        }
        summary.repointed += chunk.len();
        progress.emit(RepairEvent::BatchCommitted {
            operation: "merge-repoint".to_string(),
            committed: summary.repointed,
            total,
        });
    }
    progress.emit(RepairEvent::MergeRepointed {
        principal: plan.principal.clone(),
        repointed: summary.repointed,
    });

    // Archive + delete counts as two writes per duplicate.
    let retire_chunk = (config.chunk_size() / 2).max(1);
    let archive_collection = config.collections.archive_of(&plan.collection);
    for chunk in plan.duplicates.chunks(retire_chunk) {
        let mut batch = WriteBatch::new();
        let mut retired = Vec::new();
        for dup in chunk {
            let archived = match store.get(&plan.collection, dup).await? {
                Some(doc) => {
                    let mut archive = Document {
                        id: doc.id.clone(),
                        fields: doc.fields,
                    };
                    archive.set("mergedInto", json!(plan.principal.as_str()));
                    archive.set("archivedAt", now_value());
                    batch.put(&archive_collection, archive);
                    true
                }
                None => {
                    tracing::warn!(id = %dup, "duplicate vanished before retirement, deleting reference only");
                    false
                }
            };
            batch.delete(&plan.collection, dup.clone());
            retired.push((dup.clone(), archived));
        }
        store.apply(batch).await?;
        for (id, archived) in retired {
            summary.deleted += 1;
            if archived {
                summary.archived += 1;
            }
            progress.emit(RepairEvent::DuplicateRetired { id, archived });
        }
    }

    tracing::info!(
        principal = %plan.principal,
        repointed = summary.repointed,
        deleted = summary.deleted,
        "merge complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
    }

    #[test]
    fn earliest_creation_timestamp_wins() {
        let members = vec![
            (DocId::from("x1"), at(100)),
            (DocId::from("x2"), at(50)),
        ];
        assert_eq!(select_principal(&members), Some(DocId::from("x2")));
    }

    #[test]
    fn missing_timestamps_order_after_present_ones() {
        let members = vec![
            (DocId::from("a"), None),
            (DocId::from("b"), at(9_999)),
        ];
        assert_eq!(select_principal(&members), Some(DocId::from("b")));
    }

    #[test]
    fn ties_break_on_lexicographic_id() {
        let members = vec![
            (DocId::from("zz"), at(100)),
            (DocId::from("aa"), at(100)),
        ];
        assert_eq!(select_principal(&members), Some(DocId::from("aa")));

        let none_at_all = vec![(DocId::from("m2"), None), (DocId::from("m1"), None)];
        assert_eq!(select_principal(&none_at_all), Some(DocId::from("m1")));
    }

    #[test]
    fn empty_cluster_has_no_principal() {
        assert_eq!(select_principal(&[]), None);
    }
}
