//! # Engine Primitives
//!
//! Hardcoded runtime constants for the Quiver engine.
//!
//! These are compiled into the binary and immutable at runtime.

/// Maximum nesting depth for relationship traversal in a query.
///
/// Relationships may be cyclic (e.g. a self-referential "best friend"), so
/// recursive selects must be computationally bounded. A query tree nesting
/// deeper than this fails with `InvalidQuery`.
pub const MAX_RELATIONSHIP_DEPTH: usize = 16;

/// The reserved attribute name that resolves to a resource's id.
///
/// Every resource exposes its id under this name for selection, constraints,
/// ordering, and grouping, whether or not the schema declares it.
pub const ID_ATTRIBUTE: &str = "id";
