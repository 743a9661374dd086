//! # Core Type Definitions
//!
//! This module contains all core types for the Quiver resource graph engine:
//! - Resource identity and payloads (`ResourceRef`, `Resource`, `RelValue`)
//! - Schema definitions (`Schema`, `ResourceSchema`, `RelationshipSchema`)
//! - Error types (`QuiverError`)
//!
//! ## Determinism Guarantees
//!
//! Graph-facing types implement `Ord` so that all engine state can live in
//! `BTreeMap`/`BTreeSet` with deterministic iteration order. Attribute values
//! are `serde_json::Value`; with the `preserve_order` feature, shaped query
//! output retains requested field order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute payload of a resource or node: name → JSON value.
///
/// `serde_json::Map` preserves insertion order, which the query evaluator
/// relies on when shaping output.
pub type Attributes = serde_json::Map<String, Value>;

// =============================================================================
// RESOURCE IDENTITY
// =============================================================================

/// Identity of a resource: `(type, id)`, unique and immutable once created.
///
/// At the relationship-graph level this doubles as the opaque node key; the
/// quiver never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// The resource type name.
    #[serde(rename = "type")]
    pub ty: String,
    /// The resource id, unique within its type.
    pub id: String,
}

impl ResourceRef {
    /// Create a new resource reference.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ty, self.id)
    }
}

// =============================================================================
// RESOURCE
// =============================================================================

/// The current value of one relationship on a resource.
///
/// Cardinality `one` holds at most a single target; cardinality `many` holds
/// an ordered sequence. A to-many relationship with no targets is an empty
/// sequence, never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelValue {
    /// Cardinality `one`: a single target or none.
    One(Option<ResourceRef>),
    /// Cardinality `many`: an ordered sequence of targets.
    Many(Vec<ResourceRef>),
}

impl RelValue {
    /// The targets as an ordered list, regardless of cardinality.
    pub fn targets(&self) -> Vec<ResourceRef> {
        match self {
            Self::One(Some(target)) => vec![target.clone()],
            Self::One(None) => Vec::new(),
            Self::Many(targets) => targets.clone(),
        }
    }

    /// True if the relationship currently has no targets.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(target) => target.is_none(),
            Self::Many(targets) => targets.is_empty(),
        }
    }
}

/// A typed, identified record with attributes and relationships.
///
/// Resources passed to `ResourceGraph::assert` are partial: omitted
/// relationship keys are left untouched, present keys fully replace their
/// arrow group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource type name.
    #[serde(rename = "type")]
    pub ty: String,
    /// The resource id.
    pub id: String,
    /// Attribute values by name.
    #[serde(default)]
    pub attributes: Attributes,
    /// Relationship values by name. Absence means "not specified".
    #[serde(default)]
    pub relationships: BTreeMap<String, RelValue>,
}

impl Resource {
    /// Create a new resource with no attributes or relationships.
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: id.into(),
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// The identity of this resource.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.ty, &self.id)
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style relationship setter.
    #[must_use]
    pub fn with_rel(mut self, name: impl Into<String>, value: RelValue) -> Self {
        self.relationships.insert(name.into(), value);
        self
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one target.
    One,
    /// An ordered sequence of targets.
    Many,
}

/// Declared attribute of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// The attribute's value type name (e.g. "string", "number").
    #[serde(rename = "type")]
    pub ty: String,
}

/// Declared relationship of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSchema {
    /// The type of the related resources.
    pub related_type: String,
    /// How many targets the relationship holds.
    pub cardinality: Cardinality,
    /// Name of the reciprocal relationship on the related type, if declared.
    /// Absence means the relationship is one-directional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

/// Declared shape of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Typed attributes by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Relationships by name.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipSchema>,
}

/// A schema consumed by the engine.
///
/// Schema syntax validation happens upstream; the engine assumes the schema
/// is well-formed and only resolves lookups against it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Human-readable schema title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Resource type definitions by type name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSchema>,
}

impl Schema {
    /// Look up a resource type definition.
    pub fn resource(&self, ty: &str) -> Option<&ResourceSchema> {
        self.resources.get(ty)
    }

    /// Look up a relationship definition on a resource type.
    pub fn relationship(&self, ty: &str, rel: &str) -> Option<&RelationshipSchema> {
        self.resources.get(ty)?.relationships.get(rel)
    }

    /// Resolve the inverse relationship name for `(ty, rel)`.
    ///
    /// `None` means the relationship is one-directional and no back-arrow is
    /// maintained for it.
    pub fn inverse_of(&self, ty: &str, rel: &str) -> Option<&str> {
        self.relationship(ty, rel)?.inverse.as_deref()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the Quiver engine.
///
/// All failures are raised at detection point and abort the whole operation;
/// no partial results are returned and no error is swallowed.
#[derive(Debug, Error)]
pub enum QuiverError {
    /// An undeclared attribute or relationship key was used, or a value does
    /// not fit the declared cardinality.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// A retract or required single-id fetch targeted a nonexistent resource.
    #[error("resource not found: {0}")]
    NotFound(ResourceRef),

    /// A value is not a well-formed single-key expression, or an operator was
    /// applied to operands outside its domain.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// A structurally present but semantically illegal query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An adapter I/O failure, propagated unchanged and never retried here.
    #[error("storage error: {0}")]
    Store(String),
}

// =============================================================================
// TESTS
// =============================================================================
