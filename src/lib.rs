//! # regie-core
//!
//! A consistency engine for multi-tenant event-management data living in a
//! schemaless document store: bookings referencing artists, venues, and
//! contacts, with denormalized inverse reference lists that nothing edits
//! by hand.
//!
//! ## Overview
//!
//! Two cooperating concerns:
//!
//! - **Bidirectional relation maintenance**: after every booking save,
//!   [`relations::RelationMaintainer`] diffs the previous reference state
//!   against the saved one and adds/removes the booking id on the inverse
//!   lists of the affected entities. Best-effort and idempotent: each
//!   inverse-list write is isolated, missing targets are tolerated, and
//!   the already-saved booking is never rolled back.
//! - **Duplicate/orphan resolution**: operator-triggered scans
//!   ([`scan::scan_migration`], [`scan::find_name_collisions`],
//!   [`scan::find_similar`]) classify a tenant's records and group likely
//!   duplicates; two-phase repairs ([`repair`]) stamp missing tenant
//!   scopes and collapse duplicate clusters onto a deterministic
//!   principal, in write batches bounded by the store limit.
//!
//! The document store itself is a trait seam ([`store::DocumentStore`]):
//! named collections of JSON documents with equality queries, ordering,
//! limit/offset, and atomic bounded write batches. The bundled
//! [`store::memory::MemoryStore`] backs tests and embedding; the
//! `service` feature adds a SQLite-backed store.
//!
//! ## Quick Start
//!
//! Reconcile inverse references after saving a booking:
//!
//! ```rust
//! use regie_core::config::ConsistencyConfig;
//! use regie_core::document::Document;
//! use regie_core::relations::{RefState, RelationMaintainer};
//! use regie_core::store::{memory::MemoryStore, DocumentStore};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), regie_core::RegieError> {
//!     let store = MemoryStore::new();
//!     let config = ConsistencyConfig::default();
//!     store.seed("artists", vec![Document::new("a1"), Document::new("a2")]);
//!
//!     // Save a booking referencing artist a2.
//!     let booking = Document::new("b1").with_field("artistId", "a2");
//!     store.put("bookings", booking.clone()).await?;
//!
//!     // A brand-new booking diffs against the empty state. For an
//!     // existing booking, seed the previous state from the loaded
//!     // document with RefState::of_booking before the first save.
//!     let maintainer = RelationMaintainer::new(&store, &config.relations);
//!     let current = RefState::of_booking(&booking, &config.relations);
//!     let report = maintainer
//!         .reconcile(&booking, &RefState::empty(), &current)
//!         .await;
//!     assert!(report.is_clean());
//!     assert_eq!(report.added, 1);
//!     Ok(())
//! }
//! ```
//!
//! ### Two-Phase Repairs
//!
//! Corrective operations never execute directly: `plan_*` returns an
//! inspectable plan, `apply_*` runs it only after the caller confirmed.
//!
//! ```rust
//! use regie_core::config::ConsistencyConfig;
//! use regie_core::document::OrgId;
//! use regie_core::event::Progress;
//! use regie_core::repair;
//! use regie_core::store::memory::MemoryStore;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), regie_core::RegieError> {
//!     let store = MemoryStore::new();
//!     let config = ConsistencyConfig::default();
//!     let org = OrgId::from("org-1");
//!
//!     let plan = repair::plan_missing_scope(
//!         &store,
//!         &config,
//!         &org,
//!         &["contacts".to_string(), "venues".to_string()],
//!     )
//!     .await?;
//!     if !plan.is_empty() {
//!         // Show the plan to the operator first; this stamping cannot
//!         // distinguish ownership when several tenants' unscoped data
//!         // is colocated.
//!         repair::apply_missing_scope(&store, &config, &plan, &Progress::sink()).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Consistency Model
//!
//! - Inverse lists agree with forward references after reconciliation;
//!   adds are idempotent across both persisted list shapes (id strings
//!   and summary objects).
//! - Merges repoint every referencing document before deleting any
//!   duplicate, never the other way around.
//! - Corrective writes commit in batches of at most
//!   [`store::MAX_BATCH_WRITES`]; progress after each commit reflects
//!   exactly what is durable, and every repair is re-runnable.
//! - No optimistic concurrency: concurrent writers race with last-write-
//!   wins semantics.
//!
//! ## Features
//!
//! - **default**: relation maintenance, scans, repairs, in-memory store
//! - **service**: SQLite-backed document store (`sqlx`)
//! - **bin**: the `regie` operator CLI (implies `service`)
//!
//! ## Module Guide
//!
//! Start with [`relations`] for the save-path reconciliation, then
//! [`scan`] and [`repair`] for the operator tooling. [`store`] defines
//! the persistence seam; [`config`] names collections and relations.

pub mod config;
pub mod document;
pub mod entities;
pub mod error;
pub mod event;
pub mod relations;
pub mod repair;
pub mod scan;
pub mod similarity;
pub mod store;

pub use document::{DocId, Document, OrgId};
pub use error::RegieError;
