//! Bidirectional relation maintenance.
//!
//! A booking references related entities through foreign-key fields
//! (`artistId`, `venueId`, `contactIds`); each related entity carries a
//! denormalized inverse list of booking ids that nothing edits directly.
//! After every booking save, [`RelationMaintainer::reconcile`] diffs the
//! previous reference state against the saved one and pushes the inverse
//! lists back into agreement.
//!
//! This is a best-effort eventual-consistency mechanism, not a
//! transaction: every inverse-list write is isolated, a missing target is
//! tolerated, and a failed write is reported as a warning while the
//! sibling updates proceed. The booking itself is already persisted and
//! is never rolled back from here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    document::{now_value, DocId, Document, FIELD_UPDATED_AT},
    entities::BookingSummary,
    error::RegieError,
    store::{DocumentStore, FieldOp},
};

/// Shape of an inverse reference list on a related entity.
///
/// Both shapes occur in persisted data: plain booking-id arrays and
/// arrays of lightweight summary objects. Identity-aware store array ops
/// make removal work against either; this choice only controls what an
/// *add* writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InverseRepr {
    #[default]
    Ids,
    Summaries,
}

/// Description of one named relation from bookings to a target collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Relation name, e.g. `"artist"`.
    pub name: String,
    /// Foreign-key field on the booking document.
    pub source_field: String,
    /// Whether the foreign key is an array (`contactIds`) or a single id.
    pub multi: bool,
    /// Single-valued field consulted when the canonical array is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_field: Option<String>,
    /// Collection holding the referenced entities.
    pub target_collection: String,
    /// Inverse list field on the referenced entities.
    pub inverse_field: String,
    pub repr: InverseRepr,
    /// Denormalized copy of the target's display name on the booking,
    /// rewritten when duplicates are merged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denormalized_name_field: Option<String>,
}

impl RelationSpec {
    pub fn single(name: &str, source_field: &str, target_collection: &str) -> Self {
        RelationSpec {
            name: name.to_string(),
            source_field: source_field.to_string(),
            multi: false,
            legacy_field: None,
            target_collection: target_collection.to_string(),
            inverse_field: "bookingIds".to_string(),
            repr: InverseRepr::Ids,
            denormalized_name_field: None,
        }
    }

    pub fn multi(name: &str, source_field: &str, target_collection: &str) -> Self {
        RelationSpec {
            multi: true,
            ..RelationSpec::single(name, source_field, target_collection)
        }
    }

    pub fn with_legacy_field(mut self, field: &str) -> Self {
        self.legacy_field = Some(field.to_string());
        self
    }

    pub fn with_inverse(mut self, field: &str, repr: InverseRepr) -> Self {
        self.inverse_field = field.to_string();
        self.repr = repr;
        self
    }

    pub fn with_denormalized_name(mut self, field: &str) -> Self {
        self.denormalized_name_field = Some(field.to_string());
        self
    }

    /// Current reference set of this relation on a booking document.
    ///
    /// Multi-valued relations fall back to the legacy single-valued field
    /// when the canonical array is absent or empty, so bookings written
    /// before the array migration still seed correctly.
    pub fn refs_of(&self, booking: &Document) -> BTreeSet<DocId> {
        if self.multi {
            let ids = booking.id_list_field(&self.source_field);
            if !ids.is_empty() {
                return ids.into_iter().collect();
            }
            if let Some(legacy) = &self.legacy_field {
                if let Some(id) = booking.id_field(legacy) {
                    return BTreeSet::from([id]);
                }
            }
            BTreeSet::new()
        } else {
            booking
                .id_field(&self.source_field)
                .into_iter()
                .collect()
        }
    }
}

/// Reference state of a booking: relation name to set of referenced ids.
///
/// Callers hold the previous state across an edit session and pass it
/// explicitly to [`RelationMaintainer::reconcile`] together with the
/// just-saved state; there is no hidden bookkeeping inside the maintainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RefState(BTreeMap<String, BTreeSet<DocId>>);

impl RefState {
    /// State for a brand-new booking: every relation empty.
    pub fn empty() -> Self {
        RefState::default()
    }

    /// Seed the reference state from a freshly loaded booking.
    ///
    /// Required before the first reconciliation of an existing booking:
    /// diffing against [`RefState::empty`] instead would read as "remove
    /// everything that was referenced" and spuriously clear inverse
    /// references elsewhere.
    pub fn of_booking(booking: &Document, specs: &[RelationSpec]) -> Self {
        let mut state = BTreeMap::new();
        for spec in specs {
            state.insert(spec.name.clone(), spec.refs_of(booking));
        }
        RefState(state)
    }

    /// Builder for explicit states in tests and call sites that track
    /// references outside documents.
    pub fn with<I, T>(mut self, relation: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DocId>,
    {
        self.0.insert(
            relation.to_string(),
            ids.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn ids(&self, relation: &str) -> BTreeSet<DocId> {
        self.0.get(relation).cloned().unwrap_or_default()
    }
}

/// Pure per-relation set difference between two reference states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationDiff {
    pub to_add: BTreeSet<DocId>,
    pub to_remove: BTreeSet<DocId>,
}

impl RelationDiff {
    pub fn between(previous: &BTreeSet<DocId>, current: &BTreeSet<DocId>) -> Self {
        RelationDiff {
            to_add: current.difference(previous).cloned().collect(),
            to_remove: previous.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// A write that failed for one related entity. Non-fatal: the booking
/// save already succeeded and sibling updates were still attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetWarning {
    pub relation: String,
    pub target: DocId,
    pub error: RegieError,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    /// Targets that no longer exist; tolerated and skipped.
    pub skipped: Vec<(String, DocId)>,
    pub warnings: Vec<TargetWarning>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.warnings.is_empty()
    }
}

/// Applies reference diffs to the inverse lists of related entities.
pub struct RelationMaintainer<'a, S> {
    store: &'a S,
    specs: &'a [RelationSpec],
}

impl<'a, S: DocumentStore> RelationMaintainer<'a, S> {
    pub fn new(store: &'a S, specs: &'a [RelationSpec]) -> Self {
        RelationMaintainer { store, specs }
    }

    /// Reconcile inverse references after `booking` was saved.
    ///
    /// `previous` is the reference state before the edit session's last
    /// save (seed it with [`RefState::of_booking`] when editing an
    /// existing booking); `current` is the state just persisted. Each
    /// relation is handled independently and each target write is
    /// isolated. Re-running with identical states is a no-op.
    ///
    /// Callers must not invoke this concurrently for the same booking id;
    /// the maintainer performs no locking or in-flight deduplication.
    pub async fn reconcile(
        &self,
        booking: &Document,
        previous: &RefState,
        current: &RefState,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for spec in self.specs {
            let diff = RelationDiff::between(&previous.ids(&spec.name), &current.ids(&spec.name));
            if diff.is_empty() {
                continue;
            }
            tracing::debug!(
                relation = %spec.name,
                booking = %booking.id,
                add = diff.to_add.len(),
                remove = diff.to_remove.len(),
                "reconciling inverse references"
            );
            for target in &diff.to_remove {
                let ops = vec![
                    FieldOp::ArrayRemoveId {
                        field: spec.inverse_field.clone(),
                        id: booking.id.clone(),
                    },
                    FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
                ];
                match self
                    .store
                    .update(&spec.target_collection, target.clone(), ops)
                    .await
                {
                    Ok(()) => report.removed += 1,
                    Err(err) => self.note_failure(&mut report, spec, target, err),
                }
            }
            for target in &diff.to_add {
                let ops = vec![
                    FieldOp::ArrayUnionId {
                        field: spec.inverse_field.clone(),
                        value: self.inverse_entry(spec, booking),
                    },
                    FieldOp::Set(FIELD_UPDATED_AT.to_string(), now_value()),
                ];
                match self
                    .store
                    .update(&spec.target_collection, target.clone(), ops)
                    .await
                {
                    Ok(()) => report.added += 1,
                    Err(err) => self.note_failure(&mut report, spec, target, err),
                }
            }
        }
        report
    }

    fn inverse_entry(&self, spec: &RelationSpec, booking: &Document) -> serde_json::Value {
        match spec.repr {
            InverseRepr::Ids => serde_json::Value::String(booking.id.to_string()),
            InverseRepr::Summaries => BookingSummary::of_booking(booking).into_value(),
        }
    }

    fn note_failure(
        &self,
        report: &mut ReconcileReport,
        spec: &RelationSpec,
        target: &DocId,
        err: RegieError,
    ) {
        if err.is_not_found() {
            tracing::debug!(
                relation = %spec.name,
                target = %target,
                "related document already gone, skipping inverse update"
            );
            report.skipped.push((spec.name.clone(), target.clone()));
        } else {
            tracing::warn!(
                relation = %spec.name,
                target = %target,
                error = %err,
                "inverse reference update failed"
            );
            report.warnings.push(TargetWarning {
                relation: spec.name.clone(),
                target: target.clone(),
                error: err,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact_spec() -> RelationSpec {
        RelationSpec::multi("contact", "contactIds", "contacts").with_legacy_field("contactId")
    }

    #[test]
    fn diff_is_pure_set_difference() {
        let previous = BTreeSet::from([DocId::from("a"), DocId::from("b")]);
        let current = BTreeSet::from([DocId::from("b"), DocId::from("c")]);
        let diff = RelationDiff::between(&previous, &current);
        assert_eq!(diff.to_add, BTreeSet::from([DocId::from("c")]));
        assert_eq!(diff.to_remove, BTreeSet::from([DocId::from("a")]));

        assert!(RelationDiff::between(&current, &current).is_empty());
    }

    #[test]
    fn seeding_reads_canonical_array_before_legacy_field() {
        let spec = contact_spec();

        let canonical = Document::new("b1")
            .with_field("contactIds", json!(["c1", "c2"]))
            .with_field("contactId", "stale");
        assert_eq!(
            spec.refs_of(&canonical),
            BTreeSet::from([DocId::from("c1"), DocId::from("c2")])
        );

        let legacy_only = Document::new("b2").with_field("contactId", "c9");
        assert_eq!(spec.refs_of(&legacy_only), BTreeSet::from([DocId::from("c9")]));

        let empty = Document::new("b3").with_field("contactIds", json!([]));
        let empty_with_legacy = Document::new("b4")
            .with_field("contactIds", json!([]))
            .with_field("contactId", "c7");
        assert!(spec.refs_of(&empty).is_empty());
        assert_eq!(
            spec.refs_of(&empty_with_legacy),
            BTreeSet::from([DocId::from("c7")])
        );
    }

    #[test]
    fn single_valued_relation_is_a_set_of_at_most_one() {
        let spec = RelationSpec::single("artist", "artistId", "artists");
        let booking = Document::new("b1").with_field("artistId", "a1");
        assert_eq!(spec.refs_of(&booking), BTreeSet::from([DocId::from("a1")]));
        assert!(spec.refs_of(&Document::new("b2")).is_empty());
    }
}
