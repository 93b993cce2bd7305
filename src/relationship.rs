//! Ownership and control relationships.
//!
//! A [`Relationship`] is a directed `source -> target` edge: the source owns
//! or controls the target. Its id is derived from the raw fact it was imported
//! from, so ingesting the same fact twice upserts the same relationship.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::identifier::{Identifier, DOCUMENT_ID};
use crate::provenance::Provenance;

/// Deterministic composite relationship key.
///
/// Built from the source document id plus the child-side and parent-side
/// identifiers, each namespaced so the two sides can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(BTreeMap<String, String>);

impl RelationshipId {
    /// Derives the key for one imported ownership fact.
    ///
    /// # Examples
    ///
    /// ```
    /// use ownergraph::identifier::Identifier;
    /// use ownergraph::RelationshipId;
    ///
    /// let child = Identifier::source_company("UA EDR", "123");
    /// let parent = Identifier::source_beneficial_owner("UA EDR", "123", "Jane");
    /// assert_eq!(
    ///     RelationshipId::derive("UA EDR", &child, &parent),
    ///     RelationshipId::derive("UA EDR", &child, &parent),
    /// );
    /// ```
    #[must_use]
    pub fn derive(document_id: &str, child: &Identifier, parent: &Identifier) -> Self {
        let mut key = BTreeMap::new();
        key.insert(DOCUMENT_ID.to_string(), document_id.to_string());
        for (k, v) in child.iter() {
            key.insert(format!("child.{k}"), v.to_string());
        }
        for (k, v) in parent.iter() {
            key.insert(format!("parent.{k}"), v.to_string());
        }
        Self(key)
    }

    /// Builds a key from raw parts.
    pub fn from_parts<K, V, I>(parts: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(parts.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// The source document id, if recorded.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        self.0.get(DOCUMENT_ID).map(String::as_str)
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(";"))
    }
}

/// A typed interest with optional share bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedInterest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_min: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_max: Option<bool>,
}

/// One interest held through a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Interest {
    /// Share ranges and other structured interests.
    Typed(TypedInterest),
    /// Bare flags such as `"significant-influence-or-control"`.
    Flag(String),
}

impl Interest {
    /// Creates a bare flag interest.
    #[must_use]
    pub fn flag(kind: impl Into<String>) -> Self {
        Self::Flag(kind.into())
    }

    /// Creates a shareholding range interest.
    #[must_use]
    pub fn shareholding(min: f64, max: f64) -> Self {
        Self::Typed(TypedInterest {
            kind: "shareholding".to_string(),
            share_min: Some(min),
            share_max: Some(max),
            exclusive_min: None,
            exclusive_max: None,
        })
    }

    /// The interest type name.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Typed(t) => &t.kind,
            Self::Flag(kind) => kind,
        }
    }
}

/// Grouping key: `(source, target, sorted interest kinds)`.
pub type GroupingKey = (EntityId, EntityId, Vec<String>);

/// A directed ownership/control edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: EntityId,
    pub target: EntityId,

    #[serde(default)]
    pub interests: Vec<Interest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_indirect: Option<bool>,

    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Creates a relationship with no interests or provenance.
    #[must_use]
    pub fn new(id: RelationshipId, source: EntityId, target: EntityId) -> Self {
        Self {
            id,
            source,
            target,
            interests: Vec::new(),
            provenance: None,
            sample_date: None,
            started_date: None,
            ended_date: None,
            is_indirect: None,
            updated_at: Utc::now(),
        }
    }

    /// Sets the interests, builder style.
    #[must_use]
    pub fn with_interests(mut self, interests: Vec<Interest>) -> Self {
        self.interests = interests;
        self
    }

    /// Sets the provenance, builder style.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Returns true if the entity is either endpoint.
    #[must_use]
    pub fn involves(&self, id: EntityId) -> bool {
        self.source == id || self.target == id
    }

    /// Key used to count distinct relationships.
    #[must_use]
    pub fn grouping_key(&self) -> GroupingKey {
        let mut kinds: Vec<String> = self.interests.iter().map(|i| i.kind().to_string()).collect();
        kinds.sort();
        (self.source, self.target, kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_namespaces_sides() {
        let child = Identifier::new().with("company_number", "1");
        let parent = Identifier::new().with("company_number", "2");
        let id = RelationshipId::derive("doc", &child, &parent);
        assert_eq!(id.document_id(), Some("doc"));
        assert_ne!(id, RelationshipId::derive("doc", &parent, &child));
        assert!(id.to_string().contains("child.company_number=1"));
    }

    #[test]
    fn test_interest_deserialization() {
        let interests: Vec<Interest> = serde_json::from_value(json!([
            {"type": "shareholding", "share_min": 25.0, "share_max": 50.0},
            "voting-rights"
        ]))
        .unwrap();
        assert_eq!(interests[0].kind(), "shareholding");
        assert_eq!(interests[1], Interest::flag("voting-rights"));
    }

    #[test]
    fn test_grouping_key_sorts_interest_kinds() {
        let source = EntityId::new();
        let target = EntityId::new();
        let id = RelationshipId::from_parts([("k", "v")]);
        let a = Relationship::new(id.clone(), source, target)
            .with_interests(vec![Interest::flag("b"), Interest::flag("a")]);
        let b = Relationship::new(id, source, target).with_interests(vec![Interest::flag("a"), Interest::flag("b")]);
        assert_eq!(a.grouping_key(), b.grouping_key());
        assert!(a.involves(source));
        assert!(!a.involves(EntityId::new()));
    }
}
