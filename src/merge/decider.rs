use std::cmp::Ordering;

use crate::entity::Entity;
use crate::merge::MergeDecision;

/// Picks which of two duplicate entities survives.
///
/// Implementations must be deterministic for a given pair regardless of
/// argument order.
pub trait MergeDecider: Send + Sync {
    fn decide(&self, a: &Entity, b: &Entity) -> MergeDecision;
}

/// Keeps the entity with more populated attributes, then the one created
/// first, then the one with the smaller id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PopulatedFieldsDecider;

impl PopulatedFieldsDecider {
    fn rank(a: &Entity, b: &Entity) -> Ordering {
        b.populated_field_count()
            .cmp(&a.populated_field_count())
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    }
}

impl MergeDecider for PopulatedFieldsDecider {
    fn decide(&self, a: &Entity, b: &Entity) -> MergeDecision {
        if Self::rank(a, b) == Ordering::Greater {
            MergeDecision::new(a, b)
        } else {
            MergeDecision::new(b, a)
        }
    }
}
