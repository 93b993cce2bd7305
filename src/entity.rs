//! Entity types and identity management.
//!
//! An [`Entity`] is the canonical record for a legal entity or a natural
//! person. Its identity is its identifier set: every upsert that shares an
//! identifier with a live entity lands on that entity. Entities are never
//! hard-deleted; a merge turns the losing side into an alias whose
//! `master_entity` points at the survivor.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identifier::{self, Identifier};

/// Stable entity identifier, assigned by storage on first persist.
///
/// # Examples
///
/// ```
/// use ownergraph::EntityId;
///
/// let id = EntityId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Kind of entity. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    /// A company, trust, partnership or other legal person.
    LegalEntity,
    /// A human being.
    NaturalPerson,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegalEntity => write!(f, "legal-entity"),
            Self::NaturalPerson => write!(f, "natural-person"),
        }
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Independently nullable descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incorporation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissolution_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_of_residence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_code: Option<String>,
}

impl EntityAttributes {
    /// Number of attribute fields.
    pub const FIELD_COUNT: usize = 10;

    fn fields(&self) -> [(&'static str, &Option<String>); Self::FIELD_COUNT] {
        [
            ("name", &self.name),
            ("address", &self.address),
            ("jurisdiction_code", &self.jurisdiction_code),
            ("company_number", &self.company_number),
            ("company_type", &self.company_type),
            ("incorporation_date", &self.incorporation_date),
            ("dissolution_date", &self.dissolution_date),
            ("country_of_residence", &self.country_of_residence),
            ("nationality", &self.nationality),
            ("lang_code", &self.lang_code),
        ]
    }

    fn fields_mut(&mut self) -> [(&'static str, &mut Option<String>); Self::FIELD_COUNT] {
        [
            ("name", &mut self.name),
            ("address", &mut self.address),
            ("jurisdiction_code", &mut self.jurisdiction_code),
            ("company_number", &mut self.company_number),
            ("company_type", &mut self.company_type),
            ("incorporation_date", &mut self.incorporation_date),
            ("dissolution_date", &mut self.dissolution_date),
            ("country_of_residence", &mut self.country_of_residence),
            ("nationality", &mut self.nationality),
            ("lang_code", &mut self.lang_code),
        ]
    }

    /// Names of the mergeable attribute fields.
    #[must_use]
    pub fn field_names() -> [&'static str; Self::FIELD_COUNT] {
        Self::default().fields().map(|(name, _)| name)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(name, _)| *name == field)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Applies an update: populated incoming values overwrite, blank incoming
    /// values never clear a populated field. Returns true if anything changed.
    pub fn apply_update(&mut self, incoming: &Self) -> bool {
        let mut changed = false;
        for ((_, current), (_, next)) in self.fields_mut().into_iter().zip(incoming.fields()) {
            if is_blank(next.as_ref()) || current.as_ref() == next.as_ref() {
                continue;
            }
            current.clone_from(next);
            changed = true;
        }
        changed
    }

    /// Copies every field that is blank here and populated in `other`.
    /// Returns the names of the copied fields.
    pub fn fill_blanks_from(&mut self, other: &Self) -> Vec<&'static str> {
        let mut copied = Vec::new();
        for ((name, current), (_, theirs)) in self.fields_mut().into_iter().zip(other.fields()) {
            if is_blank(current.as_ref()) && !is_blank(theirs.as_ref()) {
                current.clone_from(theirs);
                copied.push(name);
            }
        }
        copied
    }

    /// Number of populated fields.
    #[must_use]
    pub fn populated_count(&self) -> usize {
        self.fields()
            .into_iter()
            .filter(|(_, value)| !is_blank(value.as_ref()))
            .count()
    }

    /// Replaces blank strings with `None`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for (_, value) in self.fields_mut() {
            if is_blank(value.as_ref()) {
                *value = None;
            }
        }
        self
    }
}

/// A candidate entity, not yet persisted.
///
/// # Examples
///
/// ```
/// use ownergraph::{EntityType, NewEntity};
/// use ownergraph::identifier::Identifier;
///
/// let candidate = NewEntity::legal_entity()
///     .identifier(Identifier::open_corporates("gb", "01234567"))
///     .name("Example Limited");
/// assert_eq!(candidate.entity_type, EntityType::LegalEntity);
/// assert!(candidate.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub identifiers: Vec<Identifier>,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(flatten)]
    pub attributes: EntityAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved_at: Option<DateTime<Utc>>,
}

impl NewEntity {
    /// Creates an empty candidate of the given type.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            identifiers: Vec::new(),
            entity_type,
            attributes: EntityAttributes::default(),
            last_resolved_at: None,
        }
    }

    /// Creates an empty legal-entity candidate.
    #[must_use]
    pub fn legal_entity() -> Self {
        Self::new(EntityType::LegalEntity)
    }

    /// Creates an empty natural-person candidate.
    #[must_use]
    pub fn natural_person() -> Self {
        Self::new(EntityType::NaturalPerson)
    }

    /// Adds an identifier, builder style. Repeated identifiers are ignored.
    #[must_use]
    pub fn identifier(mut self, identifier: Identifier) -> Self {
        identifier::union_into(&mut self.identifiers, std::slice::from_ref(&identifier));
        self
    }

    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.attributes.name = Some(name.into());
        self
    }

    /// Sets the address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.attributes.address = Some(address.into());
        self
    }

    /// Replaces all attributes.
    #[must_use]
    pub fn attributes(mut self, attributes: EntityAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Adds the canonical identifier built from `data`.
    pub fn add_oc_identifier(&mut self, data: &serde_json::Value) -> Result<(), ValidationError> {
        let oc = Identifier::build_open_corporates(data)?;
        identifier::union_into(&mut self.identifiers, std::slice::from_ref(&oc));
        Ok(())
    }

    /// Checks the candidate before it reaches storage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.identifiers.is_empty() {
            return Err(ValidationError::NoIdentifiers);
        }
        for identifier in &self.identifiers {
            identifier.validate()?;
        }
        Ok(())
    }
}

/// The canonical record for a legal entity or a natural person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    pub identifiers: Vec<Identifier>,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(flatten)]
    pub attributes: EntityAttributes,

    /// Set once this entity has been merged away.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_entity: Option<EntityId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Last direct write, as opposed to `updated_at` which merges also bump.
    pub self_updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved_at: Option<DateTime<Utc>>,

    pub version: u64,
}

impl Entity {
    /// Materializes a candidate under a storage-assigned id.
    #[must_use]
    pub fn from_candidate(id: EntityId, candidate: NewEntity) -> Self {
        let now = Utc::now();
        let mut identifiers = candidate.identifiers;
        identifier::dedup(&mut identifiers);
        Self {
            id,
            identifiers,
            entity_type: candidate.entity_type,
            attributes: candidate.attributes.normalized(),
            master_entity: None,
            created_at: now,
            updated_at: now,
            self_updated_at: now,
            last_resolved_at: candidate.last_resolved_at,
            version: 1,
        }
    }

    /// Returns true unless this entity has been merged into another.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.master_entity.is_none()
    }

    /// Returns true for natural persons.
    #[must_use]
    pub fn is_natural_person(&self) -> bool {
        self.entity_type == EntityType::NaturalPerson
    }

    /// Returns true for legal entities.
    #[must_use]
    pub fn is_legal_entity(&self) -> bool {
        self.entity_type == EntityType::LegalEntity
    }

    /// The first canonical identifier, if any.
    #[must_use]
    pub fn oc_identifier(&self) -> Option<&Identifier> {
        self.identifiers.iter().find(|i| i.is_open_corporates())
    }

    /// All canonical identifiers.
    #[must_use]
    pub fn oc_identifiers(&self) -> Vec<&Identifier> {
        self.identifiers.iter().filter(|i| i.is_open_corporates()).collect()
    }

    /// All PSC self-link identifiers.
    #[must_use]
    pub fn psc_self_link_identifiers(&self) -> Vec<&Identifier> {
        self.identifiers
            .iter()
            .filter(|i| i.scheme() == identifier::IdentifierScheme::PscSelfLink)
            .collect()
    }

    /// Returns true if any identifier is shared with `identifiers`.
    #[must_use]
    pub fn matches_any(&self, identifiers: &[Identifier]) -> bool {
        self.identifiers.iter().any(|i| identifiers.contains(i))
    }

    /// Number of populated attribute fields.
    #[must_use]
    pub fn populated_field_count(&self) -> usize {
        self.attributes.populated_count()
    }

    /// ISO 3166 alpha-2 country of the entity, derived from the jurisdiction
    /// code for legal entities and from the nationality for people.
    #[must_use]
    pub fn country_code(&self) -> Option<String> {
        let raw = match self.entity_type {
            EntityType::LegalEntity => self
                .attributes
                .jurisdiction_code
                .as_deref()
                .and_then(|code| code.split('_').next()),
            EntityType::NaturalPerson => self.attributes.nationality.as_deref(),
        }?;
        let raw = raw.trim();
        if raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(raw.to_ascii_uppercase())
        } else {
            None
        }
    }

    /// The document sent to the search index.
    #[must_use]
    pub fn indexed_document(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.attributes.name,
            "type": self.entity_type,
            "lang_code": self.attributes.lang_code,
            "company_number": self.attributes.company_number,
            "country_code": self.country_code(),
        })
    }

    /// Records a direct write.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.self_updated_at = now;
        self.version += 1;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
