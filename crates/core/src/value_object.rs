//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two instances with the same attributes
/// are interchangeable (`Money`, account names, stock locations). They are
/// immutable; "changing" one means building a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
