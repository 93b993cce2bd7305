//! Duplicate entity merging.
//!
//! A merge moves through `Detected -> Validated -> Merging -> Committed`, or
//! stops at `Rejected` without touching anything. The steps inside `Merging`
//! run entity first, then relationships, statements and provenance, then the
//! index. An interrupted merge leaves references on the removed side, which
//! still resolves to the survivor, and can be re-run.

mod decider;
mod merger;

use std::fmt;

use serde::Serialize;

pub use decider::{MergeDecider, PopulatedFieldsDecider};
pub use merger::Merger;

use crate::entity::{Entity, EntityId};
use crate::error::BadMergeError;
use crate::identifier::{self, Identifier};

/// Entity fields a merge never copies from the removed side.
pub const PROTECTED_FIELDS: [&str; 9] = [
    "id",
    "identifiers",
    "type",
    "master_entity",
    "created_at",
    "updated_at",
    "self_updated_at",
    "last_resolved_at",
    "version",
];

/// Where a merge ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Detected,
    Validated,
    Merging,
    Committed,
    Rejected,
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detected => "detected",
            Self::Validated => "validated",
            Self::Merging => "merging",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Which entity survives and what moves over to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeDecision {
    pub to_remove: EntityId,
    pub to_keep: EntityId,
    /// Identifiers the survivor gains.
    pub identifiers_to_transfer: Vec<Identifier>,
    /// Attribute fields blank on the survivor and populated on the removed side.
    pub fields_to_copy: Vec<&'static str>,
}

impl MergeDecision {
    /// Plans the merge of `to_remove` into `to_keep`.
    #[must_use]
    pub fn new(to_remove: &Entity, to_keep: &Entity) -> Self {
        let identifiers_to_transfer = to_remove
            .identifiers
            .iter()
            .filter(|i| !to_keep.identifiers.contains(i))
            .cloned()
            .collect();
        let fields_to_copy = to_keep.attributes.clone().fill_blanks_from(&to_remove.attributes);
        Self {
            to_remove: to_remove.id,
            to_keep: to_keep.id,
            identifiers_to_transfer,
            fields_to_copy,
        }
    }

    /// The survivor as it should look after the merge.
    #[must_use]
    pub fn apply(&self, to_remove: &Entity, to_keep: &Entity) -> Entity {
        let mut survivor = to_keep.clone();
        identifier::union_into(&mut survivor.identifiers, &to_remove.identifiers);
        survivor.attributes.fill_blanks_from(&to_remove.attributes);
        survivor
    }
}

/// Report of a finished merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub state: MergeState,
    pub decision: MergeDecision,
    pub survivor: Entity,
    pub relationships_repointed: usize,
    pub statements_repointed: usize,
    pub provenance_repointed: usize,
}

/// Checks whether `to_remove` may be merged into `to_keep`.
///
/// # Errors
/// Returns the reason the pair must not be merged. Nothing has been
/// modified when this fails.
pub fn validate(to_remove: &Entity, to_keep: &Entity) -> Result<(), BadMergeError> {
    if to_remove.id == to_keep.id {
        return Err(BadMergeError::SameEntity { id: to_keep.id });
    }
    if to_remove.entity_type != to_keep.entity_type {
        return Err(BadMergeError::TypeMismatch {
            to_remove: to_remove.entity_type,
            to_keep: to_keep.entity_type,
        });
    }
    let remove_oc = to_remove.oc_identifiers();
    let keep_oc = to_keep.oc_identifiers();
    if let (Some(remove_first), Some(keep_first)) = (remove_oc.first(), keep_oc.first()) {
        if !remove_oc.iter().any(|i| keep_oc.contains(i)) {
            return Err(BadMergeError::DifferingCanonicalIdentifiers {
                to_remove: (*remove_first).clone(),
                to_keep: (*keep_first).clone(),
            });
        }
    }
    if let Some(master) = to_keep.master_entity {
        return Err(BadMergeError::AliasedSurvivor {
            id: to_keep.id,
            master,
        });
    }
    match to_remove.master_entity {
        Some(master) if master != to_keep.id => Err(BadMergeError::AlreadyMerged {
            id: to_remove.id,
            master,
            to_keep: to_keep.id,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityAttributes, EntityType, NewEntity};

    fn entity(identifiers: &[Identifier], name: Option<&str>) -> Entity {
        let mut candidate = NewEntity::legal_entity();
        for i in identifiers {
            candidate = candidate.identifier(i.clone());
        }
        if let Some(name) = name {
            candidate = candidate.name(name);
        }
        Entity::from_candidate(EntityId::new(), candidate)
    }

    #[test]
    fn test_protected_fields_are_not_attributes() {
        let names = EntityAttributes::field_names();
        assert!(PROTECTED_FIELDS.iter().all(|f| !names.contains(f)));
    }

    #[test]
    fn test_validate_rejects_same_entity() {
        let a = entity(&[Identifier::new().with("a", "1")], None);
        let err = validate(&a, &a).unwrap_err();
        assert!(err.to_string().contains("Trying to merge the same entity"));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let a = entity(&[Identifier::new().with("a", "1")], None);
        let mut b = entity(&[Identifier::new().with("a", "2")], None);
        b.entity_type = EntityType::NaturalPerson;
        assert!(matches!(validate(&a, &b), Err(BadMergeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_validate_rejects_differing_canonical_identifiers() {
        let a = entity(&[Identifier::open_corporates("gb", "1")], None);
        let b = entity(&[Identifier::open_corporates("gb", "2")], None);
        let err = validate(&a, &b).unwrap_err();
        assert!(err.to_string().contains("differing OC identifiers detected"));

        let c = entity(&[Identifier::open_corporates("gb", "1")], None);
        assert!(validate(&a, &c).is_ok());
        let d = entity(&[Identifier::new().with("x", "y")], None);
        assert!(validate(&a, &d).is_ok());
    }

    #[test]
    fn test_validate_alias_rules() {
        let a = entity(&[Identifier::new().with("a", "1")], None);
        let b = entity(&[Identifier::new().with("a", "2")], None);
        let mut aliased = a.clone();
        aliased.master_entity = Some(b.id);
        assert!(validate(&aliased, &b).is_ok());

        let c = entity(&[Identifier::new().with("a", "3")], None);
        assert!(matches!(validate(&aliased, &c), Err(BadMergeError::AlreadyMerged { .. })));
        assert!(matches!(validate(&c, &aliased), Err(BadMergeError::AliasedSurvivor { .. })));
    }

    #[test]
    fn test_decision_plans_transfers() {
        let shared = Identifier::open_corporates("gb", "12345");
        let remove = entity(&[shared.clone()], Some("Foo"));
        let keep = entity(&[shared.clone(), Identifier::open_corporates("dk", "999")], None);

        let decision = MergeDecision::new(&remove, &keep);
        assert!(decision.identifiers_to_transfer.is_empty());
        assert_eq!(decision.fields_to_copy, vec!["name"]);

        let survivor = decision.apply(&remove, &keep);
        assert_eq!(survivor.id, keep.id);
        assert_eq!(survivor.identifiers.len(), 2);
        assert_eq!(survivor.attributes.name.as_deref(), Some("Foo"));
    }
}
