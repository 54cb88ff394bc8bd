//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new instance; constructors are the only place validation happens.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
