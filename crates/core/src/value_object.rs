//! Value object trait: equality by value, not identity.
//!
//! Quantity maps (bird categories, egg grades) are value objects: two maps holding
//! the same counts are interchangeable, no matter which movement carried them.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To "modify"
/// one, build a new value.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Counts { females: u64, males: u64 }
///
/// impl ValueObject for Counts {}
///
/// assert_eq!(Counts { females: 1, males: 0 }, Counts { females: 1, males: 0 });
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
