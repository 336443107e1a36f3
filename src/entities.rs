//! Typed views over stored documents.
//!
//! Only the shapes the engine reasons about get a struct: bookings (the
//! relation source), the lightweight booking summary used by some inverse
//! lists, and liaison rows. Related entities (artists, venues, contacts,
//! structures) stay raw [`Document`]s; the engine only ever touches their
//! inverse-list and name fields.
//!
//! Typed views are lossy projections: converting a document to a struct
//! and back drops fields the struct does not know. The raw document
//! remains the source of truth; these types exist for the save path and
//! for tests.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    document::{DocId, Document, OrgId},
    error::RegieError,
};

/// The event/date entity referencing a venue, an artist, and contacts.
///
/// The contact relation is canonically multi-valued (`contactIds`); the
/// single-valued `contactId` only exists at the persistence boundary for
/// readers that predate the array form. [`Booking::from_document`]
/// canonicalizes on the way in, [`Booking::into_document`] writes the
/// canonical array plus the derived mirror on the way out, and nothing in
/// between sees both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Booking {
    #[serde(skip)]
    pub id: DocId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<DocId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<DocId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    pub contact_ids: Vec<DocId>,
    /// Legacy single-contact mirror, first element of `contact_ids`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<DocId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrgId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn from_document(doc: &Document) -> Result<Self, RegieError> {
        let mut booking: Booking =
            serde_json::from_value(Value::Object(doc.fields.clone()))?;
        booking.id = doc.id.clone();
        booking.canonicalize();
        Ok(booking)
    }

    /// Normalize reference fields: empty strings read as absent, and the
    /// legacy `contactId` feeds `contactIds` when the array is empty.
    fn canonicalize(&mut self) {
        self.venue_id = self.venue_id.take().filter(|id| !id.0.is_empty());
        self.artist_id = self.artist_id.take().filter(|id| !id.0.is_empty());
        self.contact_ids.retain(|id| !id.0.is_empty());
        let legacy = self.contact_id.take().filter(|id| !id.0.is_empty());
        if self.contact_ids.is_empty() {
            if let Some(id) = legacy {
                self.contact_ids.push(id);
            }
        }
        self.contact_id = self.contact_ids.first().cloned();
    }

    /// Persistable document: canonical `contactIds` plus the derived
    /// legacy mirror, `updatedAt` refreshed, `createdAt` stamped once.
    pub fn into_document(mut self) -> Result<Document, RegieError> {
        self.canonicalize();
        let now = Utc::now();
        self.updated_at = Some(now);
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        let id = if self.id.0.is_empty() {
            DocId::generate()
        } else {
            self.id.clone()
        };
        let fields = match serde_json::to_value(&self)? {
            Value::Object(map) => map,
            other => {
                return Err(RegieError::Serialization(format!(
                    "booking serialized to non-object value: {other}"
                )))
            }
        };
        Ok(Document { id, fields })
    }
}

/// Lightweight booking projection stored in summary-shaped inverse lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingSummary {
    pub id: DocId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_name: Option<String>,
}

impl BookingSummary {
    pub fn of_booking(doc: &Document) -> Self {
        BookingSummary {
            id: doc.id.clone(),
            title: doc.str_field("title").unwrap_or_default().to_string(),
            when: doc
                .str_field("when")
                .and_then(|s| s.parse::<NaiveDate>().ok()),
            venue_name: doc.str_field("venueName").map(str::to_string),
        }
    }

    /// JSON element for an inverse list. Built by hand so the conversion
    /// is infallible and the `"id"` identity key is always present.
    pub fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(self.id.0));
        map.insert("title".to_string(), Value::String(self.title));
        if let Some(when) = self.when {
            map.insert("when".to_string(), Value::String(when.to_string()));
        }
        if let Some(venue_name) = self.venue_name {
            map.insert("venueName".to_string(), Value::String(venue_name));
        }
        Value::Object(map)
    }
}

fn default_active() -> bool {
    true
}

/// Join-table row expressing a contact's role within a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Liaison {
    #[serde(skip)]
    pub id: DocId,
    pub parent_id: DocId,
    pub person_id: DocId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrgId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for Liaison {
    fn default() -> Self {
        Liaison {
            id: DocId::default(),
            parent_id: DocId::default(),
            person_id: DocId::default(),
            role: None,
            active: true,
            organization_id: None,
            created_at: None,
        }
    }
}

impl Liaison {
    pub fn from_document(doc: &Document) -> Result<Self, RegieError> {
        let mut liaison: Liaison =
            serde_json::from_value(Value::Object(doc.fields.clone()))?;
        liaison.id = doc.id.clone();
        Ok(liaison)
    }

    pub fn into_document(mut self) -> Result<Document, RegieError> {
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
        let id = if self.id.0.is_empty() {
            DocId::generate()
        } else {
            self.id.clone()
        };
        let fields = match serde_json::to_value(&self)? {
            Value::Object(map) => map,
            other => {
                return Err(RegieError::Serialization(format!(
                    "liaison serialized to non-object value: {other}"
                )))
            }
        };
        Ok(Document { id, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_contact_field_feeds_canonical_array() {
        let doc = Document::new("b1")
            .with_field("title", "Spring gala")
            .with_field("contactId", "c1");
        let booking = Booking::from_document(&doc).unwrap();
        assert_eq!(booking.contact_ids, vec![DocId::from("c1")]);
        assert_eq!(booking.contact_id, Some(DocId::from("c1")));
    }

    #[test]
    fn canonical_array_wins_over_stale_legacy_field() {
        let doc = Document::new("b1")
            .with_field("contactIds", json!(["c2", "c3"]))
            .with_field("contactId", "c1");
        let booking = Booking::from_document(&doc).unwrap();
        assert_eq!(
            booking.contact_ids,
            vec![DocId::from("c2"), DocId::from("c3")]
        );
        // The mirror is re-derived, not preserved.
        assert_eq!(booking.contact_id, Some(DocId::from("c2")));
    }

    #[test]
    fn persisted_booking_carries_canonical_plus_mirror() {
        let booking = Booking {
            id: DocId::from("b1"),
            title: "Autumn tour".to_string(),
            contact_ids: vec![DocId::from("c5"), DocId::from("c6")],
            ..Booking::default()
        };
        let doc = booking.into_document().unwrap();
        assert_eq!(doc.fields["contactIds"], json!(["c5", "c6"]));
        assert_eq!(doc.fields["contactId"], json!("c5"));
        assert!(doc.updated_at().is_some());
        assert!(doc.created_at().is_some());
    }

    #[test]
    fn empty_references_are_dropped_not_persisted() {
        let doc = Document::new("b1")
            .with_field("venueId", "")
            .with_field("contactIds", json!([""]));
        let booking = Booking::from_document(&doc).unwrap();
        assert_eq!(booking.venue_id, None);
        assert!(booking.contact_ids.is_empty());

        let persisted = booking.into_document().unwrap();
        assert!(!persisted.fields.contains_key("venueId"));
        assert!(!persisted.fields.contains_key("contactId"));
    }

    #[test]
    fn summary_value_always_carries_identity() {
        let doc = Document::new("b9")
            .with_field("title", "Release party")
            .with_field("when", "2026-03-14")
            .with_field("venueName", "Great Hall");
        let value = BookingSummary::of_booking(&doc).into_value();
        assert_eq!(value["id"], json!("b9"));
        assert_eq!(value["title"], json!("Release party"));
        assert_eq!(value["when"], json!("2026-03-14"));
        assert_eq!(value["venueName"], json!("Great Hall"));
    }

    #[test]
    fn liaison_defaults_to_active() {
        let doc = Document::new("l1")
            .with_field("parentId", "s1")
            .with_field("personId", "p1");
        let liaison = Liaison::from_document(&doc).unwrap();
        assert!(liaison.active);
        assert_eq!(liaison.parent_id, DocId::from("s1"));
    }
}
