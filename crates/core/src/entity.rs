//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Batches are entities: a batch keeps its identity while its
/// derived inventory changes underneath it.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
