//! Statements made about an entity by a source.
//!
//! Registries publish statements such as "no registrable person" or "the
//! company is taking steps to find its owners". They hang off an entity and
//! follow it through merges.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;
use crate::relationship::{Interest, Relationship, RelationshipId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(Uuid);

impl StatementId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StatementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A statement attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub entity_id: EntityId,
    pub statement_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default)]
    pub details: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Statement {
    #[must_use]
    pub fn new(entity_id: EntityId, statement_type: impl Into<String>) -> Self {
        Self {
            id: StatementId::new(),
            entity_id,
            statement_type: statement_type.into(),
            date: None,
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Id of the unknown owner the statement implies. Stable for a given
    /// statement and never stored as an entity.
    #[must_use]
    pub fn unknown_owner_id(&self) -> EntityId {
        let hash = blake3::hash(format!("unknown-owner:{}", self.id).as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        EntityId::from(Uuid::from_bytes(bytes))
    }

    /// Relationship from the unknown owner to the entity, for reads of
    /// entities that have statements but no stored owners.
    #[must_use]
    pub fn to_relationship(&self) -> Relationship {
        let mut relationship = Relationship::new(
            RelationshipId::from_parts([("statement_id", self.id.to_string())]),
            self.unknown_owner_id(),
            self.entity_id,
        )
        .with_interests(vec![Interest::flag(self.statement_type.clone())]);
        relationship.sample_date.clone_from(&self.date);
        relationship.updated_at = self.created_at;
        relationship
    }
}
