//! Migration scan and duplicate detection integration tests.

mod common;

use common::{init_logging, liaison_doc, named_doc};
use regie_core::{
    config::ConsistencyConfig,
    document::{DocId, Document, OrgId},
    event::{Progress, RepairEvent},
    scan,
    similarity::structure_profile,
    store::memory::MemoryStore,
};
use serde_json::json;
use std::collections::BTreeSet;

const ORG: &str = "org-1";

fn migration_world() -> (MemoryStore, ConsistencyConfig, OrgId) {
    init_logging();
    let store = MemoryStore::new();
    // u1 exists in both collections, u2 and u3 only in the legacy one.
    store.seed(
        "contacts_unified",
        vec![
            named_doc("u1", ORG, "Harbor Lights", "2024-01-01T00:00:00Z")
                .with_field("persons", json!([{"id": "p1"}, {"id": "p2"}])),
            named_doc("u2", ORG, "Blue Note", "2024-01-02T00:00:00Z"),
            named_doc("u3", ORG, "Red Door", "2024-01-03T00:00:00Z"),
            // Another tenant's record must not leak into the report.
            named_doc("other", "org-2", "Elsewhere", "2024-01-01T00:00:00Z"),
        ],
    );
    store.seed(
        "structures",
        vec![
            named_doc("u1", ORG, "Harbor Lights", "2024-01-01T00:00:00Z"),
            named_doc("s9", ORG, "Fully Migrated", "2024-02-01T00:00:00Z"),
        ],
    );
    store.seed(
        "liaisons",
        vec![
            liaison_doc("l1", ORG, "u2", "p1"),
            liaison_doc("l2", ORG, "u2", "p2"),
        ],
    );
    (store, ConsistencyConfig::default(), OrgId::from(ORG))
}

#[tokio::test]
async fn classification_is_exhaustive_and_exclusive() {
    let (store, config, org) = migration_world();
    let (progress, mut events) = Progress::channel();
    let report = scan::scan_migration(&store, &config, &org, &progress)
        .await
        .unwrap();
    drop(progress);

    assert_eq!(report.total_checked, 3);

    let ids = |entries: &[scan::ScanEntry]| -> BTreeSet<String> {
        entries.iter().map(|e| e.id.to_string()).collect()
    };
    assert_eq!(ids(&report.duplicated), BTreeSet::from(["u1".to_string()]));
    assert_eq!(
        ids(&report.not_migrated),
        BTreeSet::from(["u2".to_string(), "u3".to_string()])
    );
    assert_eq!(ids(&report.migrated), BTreeSet::from(["s9".to_string()]));

    // Each legacy document lands in exactly one bucket.
    let mut all = ids(&report.duplicated);
    all.extend(ids(&report.not_migrated));
    assert_eq!(all.len(), report.total_checked);
    assert!(ids(&report.duplicated)
        .intersection(&ids(&report.not_migrated))
        .next()
        .is_none());

    // The orphan flag marks only not-migrated entries with liaison rows.
    assert_eq!(
        ids(&report.with_orphan_liaisons),
        BTreeSet::from(["u2".to_string()])
    );
    let orphan = &report.with_orphan_liaisons[0];
    assert_eq!(orphan.liaison_count, 2);

    // Embedded person records surface in the report entries.
    let duplicated = &report.duplicated[0];
    assert_eq!(duplicated.person_count, 2);
    assert_eq!(duplicated.display_name, "Harbor Lights");

    // Scan progress events bracket the run.
    assert_eq!(
        events.try_recv().unwrap(),
        RepairEvent::ScanStarted {
            collection: "contacts_unified".to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        RepairEvent::ScanCompleted {
            collection: "contacts_unified".to_string(),
            total_checked: 3
        }
    );
}

#[tokio::test]
async fn name_collisions_group_by_normalized_key() {
    init_logging();
    let store = MemoryStore::new();
    let config = ConsistencyConfig::default();
    store.seed(
        "structures",
        vec![
            named_doc("s1", ORG, "Le Zénith", "2024-01-01T00:00:00Z"),
            named_doc("s2", ORG, "  le zenith ", "2024-02-01T00:00:00Z"),
            named_doc("s3", ORG, "Harbor Lights", "2024-01-01T00:00:00Z"),
            // Unnamed records never form a cluster.
            Document::new("s4").with_field("organizationId", ORG),
        ],
    );

    let clusters = scan::find_name_collisions(&store, &config, &OrgId::from(ORG), "structures")
        .await
        .unwrap();
    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    assert_eq!(cluster.key, "lezenith");
    let members: Vec<&str> = cluster.members.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(members, vec!["s1", "s2"]);
    assert!(cluster.score.is_none());
}

#[tokio::test]
async fn fuzzy_detection_clusters_near_identical_records() {
    init_logging();
    let store = MemoryStore::new();
    let config = ConsistencyConfig::default();
    store.seed(
        "structures",
        vec![
            named_doc("s1", ORG, "Blue Note Productions", "2024-01-01T00:00:00Z")
                .with_field("legalName", "Blue Note Productions")
                .with_field("email", "hello@bluenote.example"),
            named_doc("s2", ORG, "Blue Note Production", "2024-02-01T00:00:00Z")
                .with_field("legalName", "Blue Note Production")
                .with_field("email", "hello@bluenote.example"),
            named_doc("s3", ORG, "Harbor Lights Agency", "2024-01-01T00:00:00Z")
                .with_field("legalName", "Harbor Lights Agency")
                .with_field("email", "booking@harborlights.example"),
        ],
    );

    let clusters = scan::find_similar(
        &store,
        &config,
        &OrgId::from(ORG),
        "structures",
        &structure_profile(),
    )
    .await
    .unwrap();

    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    let members: BTreeSet<&str> = cluster.members.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(members, BTreeSet::from(["s1", "s2"]));
    let score = cluster.score.as_ref().unwrap();
    assert!(score.score >= config.similarity_threshold);
    assert!(score.reasons.iter().any(|r| r.field == "email"));
}

#[tokio::test]
async fn review_queue_orders_pending_clusters_by_score() {
    init_logging();
    let store = MemoryStore::new();
    let config = ConsistencyConfig::default();
    let org = OrgId::from(ORG);
    store.seed(
        "structures",
        vec![
            named_doc("s1", ORG, "Blue Note", "2024-01-01T00:00:00Z")
                .with_field("legalName", "Blue Note")
                .with_field("email", "a@x.example"),
            named_doc("s2", ORG, "Blue Note", "2024-02-01T00:00:00Z")
                .with_field("legalName", "Blue Note")
                .with_field("email", "a@x.example"),
            named_doc("s3", ORG, "Harbor Light", "2024-01-01T00:00:00Z")
                .with_field("legalName", "Harbor Light"),
            named_doc("s4", ORG, "Harbor Lights", "2024-02-01T00:00:00Z")
                .with_field("legalName", "Harbor Lights"),
        ],
    );

    let clusters = scan::find_similar(&store, &config, &org, "structures", &structure_profile())
        .await
        .unwrap();
    assert_eq!(clusters.len(), 2);
    let saved = scan::save_for_review(&store, &config, &org, &clusters)
        .await
        .unwrap();
    assert_eq!(saved, 2);

    let pending = scan::pending_reviews(&store, &config, &org).await.unwrap();
    assert_eq!(pending.len(), 2);
    // Strongest candidate first: the exact name + email pair beats the
    // name-only near-match.
    let first_score = pending[0].fields["score"].as_f64().unwrap();
    let second_score = pending[1].fields["score"].as_f64().unwrap();
    assert!(first_score >= second_score);

    // Dismissing removes a record from the pending queue.
    let dismissed_id = pending[1].id.clone();
    scan::dismiss_review(&store, &config, dismissed_id.clone())
        .await
        .unwrap();
    let pending = scan::pending_reviews(&store, &config, &org).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, dismissed_id);

    let resolved_id = pending[0].id.clone();
    scan::resolve_review(&store, &config, resolved_id).await.unwrap();
    assert!(scan::pending_reviews(&store, &config, &org)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn converged_tenant_produces_an_empty_report() {
    init_logging();
    let store = MemoryStore::new();
    let config = ConsistencyConfig::default();
    store.seed(
        "structures",
        vec![named_doc("s1", ORG, "Harbor Lights", "2024-01-01T00:00:00Z")],
    );

    let report = scan::scan_migration(&store, &config, &OrgId::from(ORG), &Progress::sink())
        .await
        .unwrap();
    assert!(report.is_converged());
    assert_eq!(report.total_checked, 0);
    assert_eq!(report.migrated.len(), 1);

    let clusters = scan::find_name_collisions(&store, &config, &OrgId::from(ORG), "structures")
        .await
        .unwrap();
    assert!(clusters.is_empty());
}
