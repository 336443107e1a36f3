//! Consistency scans.
//!
//! Operator-triggered, read-only passes over a tenant's data. The
//! migration scan classifies every directory record against the
//! post-migration collection; the duplicate detectors group records that
//! look like the same real-world entity. Scans only ever produce
//! reports; corrective writes live in [`crate::repair`] behind a
//! separate plan/apply step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::ConsistencyConfig,
    document::{now_value, DocId, Document, OrgId, FIELD_CREATED_AT, FIELD_ORG, FIELD_UPDATED_AT},
    error::RegieError,
    event::{Progress, RepairEvent},
    similarity::{document_similarity, normalize_key, FieldWeight, SimilarityScore},
    store::{Direction, DocumentStore, FieldOp, Query, WriteBatch},
};

/// One record in a migration report, with enough denormalized display
/// data for an operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    pub id: DocId,
    pub display_name: String,
    /// Embedded person records on the legacy document.
    pub person_count: usize,
    /// Liaison rows referencing this record as parent.
    pub liaison_count: usize,
}

/// Migration state of a tenant's directory records.
///
/// Every record of the legacy and current collections lands in exactly
/// one of `migrated`, `not_migrated`, or `duplicated`;
/// `with_orphan_liaisons` is an orthogonal flag listing the
/// `not_migrated` entries whose liaison rows would dangle if the legacy
/// record were deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub organization_id: OrgId,
    /// Legacy documents examined.
    pub total_checked: usize,
    /// Present in the current collection only.
    pub migrated: Vec<ScanEntry>,
    /// Present in the legacy collection only.
    pub not_migrated: Vec<ScanEntry>,
    /// Present in both collections simultaneously.
    pub duplicated: Vec<ScanEntry>,
    pub with_orphan_liaisons: Vec<ScanEntry>,
}

impl MigrationReport {
    /// True when nothing needs operator attention.
    pub fn is_converged(&self) -> bool {
        self.not_migrated.is_empty() && self.duplicated.is_empty()
    }
}

/// Classify a tenant's legacy directory records against the current
/// collection and flag liaison rows that would be orphaned.
pub async fn scan_migration<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    progress: &Progress,
) -> Result<MigrationReport, RegieError> {
    let names = &config.collections;
    progress.emit(RepairEvent::ScanStarted {
        collection: names.legacy_directory.clone(),
    });

    let legacy = store
        .query(&names.legacy_directory, &Query::scoped(org))
        .await?;
    let current = store.query(&names.structures, &Query::scoped(org)).await?;
    let liaisons = store.query(&names.liaisons, &Query::scoped(org)).await?;

    let current_by_id: BTreeMap<&DocId, &Document> =
        current.iter().map(|doc| (&doc.id, doc)).collect();
    let mut liaison_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for liaison in &liaisons {
        if let Some(parent) = liaison.str_field("parentId") {
            *liaison_counts.entry(parent).or_default() += 1;
        }
    }

    let mut report = MigrationReport {
        organization_id: org.clone(),
        total_checked: legacy.len(),
        ..MigrationReport::default()
    };

    for doc in &legacy {
        let entry = ScanEntry {
            id: doc.id.clone(),
            display_name: doc.display_name(&config.name_fields),
            person_count: doc.array_len("persons"),
            liaison_count: liaison_counts.get(doc.id.as_str()).copied().unwrap_or(0),
        };
        if current_by_id.contains_key(&doc.id) {
            report.duplicated.push(entry);
        } else {
            if entry.liaison_count > 0 {
                report.with_orphan_liaisons.push(entry.clone());
            }
            report.not_migrated.push(entry);
        }
    }

    let legacy_ids: BTreeSet<&DocId> = legacy.iter().map(|doc| &doc.id).collect();
    for doc in &current {
        if !legacy_ids.contains(&doc.id) {
            report.migrated.push(ScanEntry {
                id: doc.id.clone(),
                display_name: doc.display_name(&config.name_fields),
                person_count: 0,
                liaison_count: liaison_counts.get(doc.id.as_str()).copied().unwrap_or(0),
            });
        }
    }

    progress.emit(RepairEvent::ScanCompleted {
        collection: names.legacy_directory.clone(),
        total_checked: report.total_checked,
    });
    tracing::info!(
        org = %org,
        total = report.total_checked,
        migrated = report.migrated.len(),
        not_migrated = report.not_migrated.len(),
        duplicated = report.duplicated.len(),
        orphan_liaisons = report.with_orphan_liaisons.len(),
        "migration scan complete"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMember {
    pub id: DocId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ClusterMember {
    fn of_document(doc: &Document, name_fields: &[String]) -> Self {
        ClusterMember {
            id: doc.id.clone(),
            display_name: doc.display_name(name_fields),
            created_at: doc.created_at(),
        }
    }
}

/// A group of ≥2 documents considered the same real-world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCluster {
    /// Normalized grouping key, or the seed member's key for fuzzy
    /// clusters.
    pub key: String,
    pub members: Vec<ClusterMember>,
    /// Best pairwise score for fuzzy clusters; absent for exact
    /// name collisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<SimilarityScore>,
}

/// Exact-collision detection: group a collection by normalized display
/// name. Deterministic: clusters sorted by key, members by id.
pub async fn find_name_collisions<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    collection: &str,
) -> Result<Vec<DuplicateCluster>, RegieError> {
    let docs = store.query(collection, &Query::scoped(org)).await?;
    let mut groups: BTreeMap<String, Vec<ClusterMember>> = BTreeMap::new();
    for doc in &docs {
        let key = normalize_key(&doc.display_name(&config.name_fields));
        if key.is_empty() {
            continue;
        }
        groups
            .entry(key)
            .or_default()
            .push(ClusterMember::of_document(doc, &config.name_fields));
    }
    let clusters: Vec<DuplicateCluster> = groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(key, mut members)| {
            members.sort_by(|a, b| a.id.cmp(&b.id));
            DuplicateCluster {
                key,
                members,
                score: None,
            }
        })
        .collect();
    tracing::info!(
        collection,
        clusters = clusters.len(),
        "name collision detection complete"
    );
    Ok(clusters)
}

/// Fuzzy duplicate detection over a weighted comparison profile.
///
/// Greedy pairwise clustering: each unprocessed document seeds a cluster
/// and absorbs every later document scoring at or above the configured
/// threshold against the seed. Quadratic in collection size, which the
/// operator-triggered usage tolerates.
pub async fn find_similar<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    collection: &str,
    profile: &[FieldWeight],
) -> Result<Vec<DuplicateCluster>, RegieError> {
    let docs = store.query(collection, &Query::scoped(org)).await?;
    let mut processed = vec![false; docs.len()];
    let mut clusters = Vec::new();

    for i in 0..docs.len() {
        if processed[i] {
            continue;
        }
        processed[i] = true;
        let mut members = vec![ClusterMember::of_document(&docs[i], &config.name_fields)];
        let mut best: Option<SimilarityScore> = None;
        for j in (i + 1)..docs.len() {
            if processed[j] {
                continue;
            }
            let score = document_similarity(&docs[i], &docs[j], profile);
            if score.score >= config.similarity_threshold {
                processed[j] = true;
                members.push(ClusterMember::of_document(&docs[j], &config.name_fields));
                let is_better = best
                    .as_ref()
                    .map(|b| score.score > b.score)
                    .unwrap_or(true);
                if is_better {
                    best = Some(score);
                }
            }
        }
        if members.len() > 1 {
            clusters.push(DuplicateCluster {
                key: normalize_key(&members[0].display_name),
                members,
                score: best,
            });
        }
    }
    tracing::info!(
        collection,
        clusters = clusters.len(),
        "similarity detection complete"
    );
    Ok(clusters)
}

/// Persist detected clusters to the review queue for later operator
/// confirmation. Returns the number of review records written.
pub async fn save_for_review<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
    clusters: &[DuplicateCluster],
) -> Result<usize, RegieError> {
    let reviews = &config.collections.reviews;
    for chunk in clusters.chunks(config.chunk_size()) {
        let mut batch = WriteBatch::new();
        for cluster in chunk {
            let mut doc = Document::new(DocId::generate());
            doc.set(FIELD_ORG, org.as_str());
            doc.set("status", "pending");
            doc.set("key", cluster.key.as_str());
            doc.set(
                "score",
                cluster
                    .score
                    .as_ref()
                    .map(|s| json!(s.score))
                    .unwrap_or(json!(1.0)),
            );
            doc.set("members", serde_json::to_value(&cluster.members)?);
            doc.set(FIELD_CREATED_AT, now_value());
            batch.put(reviews, doc);
        }
        store.apply(batch).await?;
    }
    Ok(clusters.len())
}

/// Pending review records, strongest candidates first.
pub async fn pending_reviews<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    org: &OrgId,
) -> Result<Vec<Document>, RegieError> {
    let query = Query::scoped(org)
        .filter("status", "pending")
        .order_by("score", Direction::Descending);
    store.query(&config.collections.reviews, &query).await
}

/// Mark a review record as not-a-duplicate.
pub async fn dismiss_review<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    id: DocId,
) -> Result<(), RegieError> {
    store
        .update(
            &config.collections.reviews,
            id,
            vec![
                FieldOp::Set("status".to_string(), json!("dismissed")),
                FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
            ],
        )
        .await
}

/// Mark a review record as resolved by a merge.
pub async fn resolve_review<S: DocumentStore>(
    store: &S,
    config: &ConsistencyConfig,
    id: DocId,
) -> Result<(), RegieError> {
    store
        .update(
            &config.collections.reviews,
            id,
            vec![
                FieldOp::Set("status".to_string(), json!("merged")),
                FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
            ],
        )
        .await
}
