//! Identity resolution.
//!
//! A resolver runs on a child-side candidate before its first persist and may
//! attach canonical identifiers (for example a registry-local company code
//! mapped to its global `{jurisdiction_code, company_number}` form). It must
//! never change the entity type or drop an identifier; [`resolve_checked`]
//! enforces that.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::entity::{EntityAttributes, EntityType, NewEntity};
use crate::error::{GraphResult, ValidationError};
use crate::identifier::{self, Identifier};

/// Attaches canonical identifiers to a candidate entity.
pub trait IdentityResolver: Send + Sync {
    /// Returns the candidate, possibly augmented.
    fn resolve(&self, candidate: NewEntity) -> GraphResult<NewEntity>;
}

/// Resolver that changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl IdentityResolver for NoopResolver {
    fn resolve(&self, candidate: NewEntity) -> GraphResult<NewEntity> {
        Ok(candidate)
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    canonical: Identifier,
    attributes: EntityAttributes,
}

/// Resolves legal entities against a lookup table of registry records keyed
/// by `(jurisdiction_code, company_number)`.
#[derive(Debug, Default, Clone)]
pub struct RegistryResolver {
    entries: HashMap<(String, String), RegistryEntry>,
}

fn lookup_key(jurisdiction_code: &str, company_number: &str) -> (String, String) {
    (
        jurisdiction_code.trim().to_ascii_lowercase(),
        company_number.trim().to_string(),
    )
}

impl RegistryResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registry record, builder style.
    #[must_use]
    pub fn with_entry(
        mut self,
        jurisdiction_code: &str,
        company_number: &str,
        canonical: Identifier,
        attributes: EntityAttributes,
    ) -> Self {
        self.entries.insert(
            lookup_key(jurisdiction_code, company_number),
            RegistryEntry { canonical, attributes },
        );
        self
    }

    /// Number of registry records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityResolver for RegistryResolver {
    fn resolve(&self, mut candidate: NewEntity) -> GraphResult<NewEntity> {
        if candidate.entity_type != EntityType::LegalEntity {
            return Ok(candidate);
        }
        let (Some(jurisdiction), Some(number)) = (
            candidate.attributes.jurisdiction_code.as_deref(),
            candidate.attributes.company_number.as_deref(),
        ) else {
            return Ok(candidate);
        };

        let key = lookup_key(jurisdiction, number);
        candidate.last_resolved_at = Some(Utc::now());

        if let Some(entry) = self.entries.get(&key) {
            debug!(
                jurisdiction_code = %key.0,
                company_number = %key.1,
                canonical = %entry.canonical,
                "resolved registry company"
            );
            identifier::union_into(&mut candidate.identifiers, std::slice::from_ref(&entry.canonical));
            candidate.attributes.apply_update(&entry.attributes);
        }
        Ok(candidate)
    }
}

/// Runs `resolver` and rejects results that changed the type or dropped an
/// identifier.
pub fn resolve_checked(resolver: &dyn IdentityResolver, candidate: NewEntity) -> GraphResult<NewEntity> {
    let entity_type = candidate.entity_type;
    let original = candidate.identifiers.clone();

    let resolved = resolver.resolve(candidate)?;

    if resolved.entity_type != entity_type {
        return Err(ValidationError::ResolverContract {
            reason: format!("type changed from {entity_type} to {}", resolved.entity_type),
        }
        .into());
    }
    if let Some(dropped) = original.iter().find(|i| !resolved.identifiers.contains(i)) {
        return Err(ValidationError::ResolverContract {
            reason: format!("identifier {dropped} was dropped"),
        }
        .into());
    }
    Ok(resolved)
}
