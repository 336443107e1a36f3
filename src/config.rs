use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
};

use crate::{
    error::RegieError,
    relations::{InverseRepr, RelationSpec},
    store::MAX_BATCH_WRITES,
};

/// Collection names of one deployment. Defaults match the conventional
/// layout; deployments that renamed collections override via TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionNames {
    pub bookings: String,
    pub artists: String,
    pub venues: String,
    pub contacts: String,
    pub structures: String,
    pub liaisons: String,
    /// Pre-migration collection holding unified directory records keyed
    /// by the same document ids as `structures`.
    pub legacy_directory: String,
    /// Persisted duplicate-review queue.
    pub reviews: String,
    /// Appended to a collection name for merge archives.
    pub archive_suffix: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        CollectionNames {
            bookings: "bookings".to_string(),
            artists: "artists".to_string(),
            venues: "venues".to_string(),
            contacts: "contacts".to_string(),
            structures: "structures".to_string(),
            liaisons: "liaisons".to_string(),
            legacy_directory: "contacts_unified".to_string(),
            reviews: "duplicate_reviews".to_string(),
            archive_suffix: "_archive".to_string(),
        }
    }
}

impl CollectionNames {
    pub fn archive_of(&self, collection: &str) -> String {
        format!("{collection}{}", self.archive_suffix)
    }
}

/// Tunables and naming for the consistency engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Writes per committed batch; clamped to the store maximum.
    pub batch_limit: usize,
    /// Minimum weighted similarity for fuzzy duplicate clustering.
    pub similarity_threshold: f64,
    /// Field order consulted when deriving a display name.
    pub name_fields: Vec<String>,
    pub collections: CollectionNames,
    pub relations: Vec<RelationSpec>,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        let collections = CollectionNames::default();
        let relations = vec![
            RelationSpec::single("artist", "artistId", &collections.artists)
                .with_denormalized_name("artistName"),
            RelationSpec::single("venue", "venueId", &collections.venues)
                .with_inverse("bookingSummaries", InverseRepr::Summaries)
                .with_denormalized_name("venueName"),
            RelationSpec::multi("contact", "contactIds", &collections.contacts)
                .with_legacy_field("contactId"),
        ];
        ConsistencyConfig {
            batch_limit: MAX_BATCH_WRITES,
            similarity_threshold: 0.8,
            name_fields: vec![
                "name".to_string(),
                "legalName".to_string(),
                "title".to_string(),
            ],
            collections,
            relations,
        }
    }
}

impl ConsistencyConfig {
    /// Effective chunk size for corrective batches.
    pub fn chunk_size(&self) -> usize {
        self.batch_limit.clamp(1, MAX_BATCH_WRITES)
    }
}

/// Read configuration from a TOML file. A missing file yields defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConsistencyConfig, RegieError> {
    let path = path.as_ref();
    tracing::debug!("Attempting to read configuration from: {:?}", path);
    if !path.exists() {
        tracing::debug!("Config file not found, using defaults.");
        return Ok(ConsistencyConfig::default());
    }
    let content = read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

pub fn save_config<P: AsRef<Path>>(path: P, config: &ConsistencyConfig) -> Result<(), RegieError> {
    tracing::debug!("Attempting to write configuration to: {:?}", path.as_ref());
    let toml_string = toml::to_string(config)?;
    write(path, toml_string)?;
    Ok(())
}
