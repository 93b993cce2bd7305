//! Source and provenance types.
//!
//! Every imported fact must say where it came from. Relationships embed a
//! [`Provenance`]; entities and relationships are additionally linked back to
//! the raw records they were built from through [`RawDataProvenance`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::relationship::RelationshipId;

/// Where a relationship came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    pub source_name: String,

    pub retrieved_at: DateTime<Utc>,

    pub imported_at: DateTime<Utc>,
}

impl Provenance {
    /// Provenance stamped with the current import time.
    #[must_use]
    pub fn new(source_name: impl Into<String>, source_url: Option<String>, retrieved_at: DateTime<Utc>) -> Self {
        Self {
            source_url,
            source_name: source_name.into(),
            retrieved_at,
            imported_at: Utc::now(),
        }
    }
}

/// Content-addressed raw record id (blake3 of the raw line).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecordId(String);

impl RawRecordId {
    /// Hashes raw record content.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownergraph::provenance::RawRecordId;
    ///
    /// assert_eq!(RawRecordId::for_content("{}"), RawRecordId::for_content("{}"));
    /// assert_ne!(RawRecordId::for_content("{}"), RawRecordId::for_content("[]"));
    /// ```
    #[must_use]
    pub fn for_content(raw: &str) -> Self {
        Self(blake3::hash(raw.as_bytes()).to_hex().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One raw line as staged from a bulk source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: RawRecordId,
    pub raw_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub import_id: String,
}

impl RawRecord {
    #[must_use]
    pub fn new(raw_data: impl Into<String>, etag: Option<String>, import_id: impl Into<String>) -> Self {
        let raw_data = raw_data.into();
        Self {
            id: RawRecordId::for_content(&raw_data),
            raw_data,
            etag,
            import_id: import_id.into(),
        }
    }
}

/// What a raw-data provenance record points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ProvenanceSubject {
    Entity(EntityId),
    Relationship(RelationshipId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceId(Uuid);

impl ProvenanceId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProvenanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Links an entity or relationship to the raw records of one import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataProvenance {
    pub id: ProvenanceId,
    pub subject: ProvenanceSubject,
    pub import_id: String,
    pub raw_record_ids: Vec<RawRecordId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RawDataProvenance {
    #[must_use]
    pub fn new(subject: ProvenanceSubject, import_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProvenanceId::new(),
            subject,
            import_id: import_id.into(),
            raw_record_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds raw record ids not already present. Returns the number added.
    pub fn add_records(&mut self, ids: &[RawRecordId]) -> usize {
        let mut added = 0;
        for id in ids {
            if !self.raw_record_ids.contains(id) {
                self.raw_record_ids.push(id.clone());
                added += 1;
            }
        }
        if added > 0 {
            self.updated_at = Utc::now();
        }
        added
    }

    /// Returns true if this record points at the entity.
    #[must_use]
    pub fn is_for_entity(&self, id: EntityId) -> bool {
        self.subject == ProvenanceSubject::Entity(id)
    }
}
