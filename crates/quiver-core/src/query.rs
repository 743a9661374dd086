//! # Query Tree
//!
//! Typed representation of a query against the resource graph.
//!
//! A query names a root type (optionally narrowed to a single id), the fields
//! to project, constraint predicates, ordering, grouping, and pagination.
//! Selection entries are ordered; shaped output contains exactly the
//! requested fields in requested order. Protocol adapters translate their own
//! wire formats into this tree; the evaluator assumes upstream syntax
//! validation and fails fast with `InvalidQuery` on anything structurally
//! illegal that reaches it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// SELECTION
// =============================================================================

/// What one output field projects.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectKind {
    /// Project a stored attribute (or the reserved `id`) by name.
    Attribute(String),
    /// Traverse a relationship, shaping targets with a nested sub-query.
    /// The sub-query's `ty` is resolved from the schema during evaluation
    /// and is left empty here.
    Relationship(Box<Query>),
    /// Evaluate an expression with the resource as input.
    Computed(Value),
}

/// One entry of a query's `select` list: output field name plus projection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectEntry {
    /// The name the field appears under in shaped output.
    pub name: String,
    /// What the field projects.
    pub kind: SelectKind,
}

impl SelectEntry {
    /// Select an attribute under its own name.
    pub fn attribute(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: SelectKind::Attribute(name.clone()),
            name,
        }
    }

    /// Select attribute `source` under the output name `name`.
    pub fn renamed(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SelectKind::Attribute(source.into()),
        }
    }

    /// Select relationship `name`, shaping each target with `sub`.
    pub fn relationship(name: impl Into<String>, sub: Query) -> Self {
        Self {
            name: name.into(),
            kind: SelectKind::Relationship(Box::new(sub)),
        }
    }

    /// Select a computed field evaluated with the resource as input.
    pub fn computed(name: impl Into<String>, expr: Value) -> Self {
        Self {
            name: name.into(),
            kind: SelectKind::Computed(expr),
        }
    }
}

// =============================================================================
// ORDERING
// =============================================================================

/// Sort direction for one order key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ascending (the default).
    #[default]
    Asc,
    /// Descending: reverses this key's comparator only.
    Desc,
}

/// One key of a multi-key stable sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// The field to compare. Must be numeric or string valued across the
    /// whole collection.
    pub property: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: Direction,
}

impl OrderItem {
    /// Ascending order on `property`.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending order on `property`.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
        }
    }
}

// =============================================================================
// GROUPING
// =============================================================================

/// One entry of a grouping's `select` list.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupSelectEntry {
    /// `"*"`: expand to all `by` fields under their own names.
    All,
    /// Emit `by` field `by_field` under the output name `name`.
    Field {
        /// Output field name.
        name: String,
        /// The `by` field this projects. Must appear in `Grouping::by`.
        by_field: String,
    },
    /// Evaluate an expression with the group tuple bound as variable context.
    /// Every `$var` it references must appear in `Grouping::by`.
    Computed {
        /// Output field name.
        name: String,
        /// The expression to evaluate per group.
        expr: Value,
    },
}

impl GroupSelectEntry {
    /// Emit a `by` field under its own name.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Field {
            by_field: name.clone(),
            name,
        }
    }

    /// Emit `by` field `by_field` under the output name `name`.
    pub fn renamed(name: impl Into<String>, by_field: impl Into<String>) -> Self {
        Self::Field {
            name: name.into(),
            by_field: by_field.into(),
        }
    }

    /// Emit a computed field evaluated against the group tuple.
    pub fn computed(name: impl Into<String>, expr: Value) -> Self {
        Self::Computed {
            name: name.into(),
            expr,
        }
    }
}

/// Partition a collection by the tuple of `by` field values.
///
/// Distinct tuples emit in first-encountered order unless the query also
/// orders. When grouping is present it defines the output shape; the query's
/// own `select` governs only ungrouped evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grouping {
    /// Ordered field names forming the group tuple.
    pub by: Vec<String>,
    /// Output fields per group. Absent means the `by` fields themselves.
    pub select: Option<Vec<GroupSelectEntry>>,
}

impl Grouping {
    /// Group by the given fields with the default select.
    pub fn by(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            by: fields.into_iter().map(Into::into).collect(),
            select: None,
        }
    }

    /// Builder-style select setter.
    #[must_use]
    pub fn with_select(mut self, select: Vec<GroupSelectEntry>) -> Self {
        self.select = Some(select);
        self
    }
}

// =============================================================================
// QUERY
// =============================================================================

/// A validated query tree node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Root resource type. Empty on relationship sub-queries, whose type is
    /// resolved from the schema.
    pub ty: String,
    /// Narrow to a single resource. The result is one shaped object (or an
    /// error for a missing id), not a collection.
    pub id: Option<String>,
    /// Ordered output projection.
    pub select: Vec<SelectEntry>,
    /// Constraint predicates, all of which must pass (logical AND). Keys are
    /// field names; values are comparison-operator objects, expressions, or
    /// literals tested by deep equality.
    pub constraints: serde_json::Map<String, Value>,
    /// Multi-key stable sort. Illegal on single-resource queries.
    pub order: Vec<OrderItem>,
    /// Partitioning. When present it defines the output shape.
    pub group: Option<Grouping>,
    /// Keep at most this many results, applied after ordering.
    pub limit: Option<usize>,
    /// Skip this many results, applied after ordering and before `limit`.
    pub offset: usize,
}

impl Query {
    /// A collection query over all resources of `ty`.
    pub fn of(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            ..Self::default()
        }
    }

    /// A single-resource query for `(ty, id)`.
    pub fn single(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Builder-style select setter.
    #[must_use]
    pub fn with_select(mut self, select: Vec<SelectEntry>) -> Self {
        self.select = select;
        self
    }

    /// Builder-style constraint setter.
    #[must_use]
    pub fn with_constraint(mut self, field: impl Into<String>, value: Value) -> Self {
        self.constraints.insert(field.into(), value);
        self
    }

    /// Builder-style order setter.
    #[must_use]
    pub fn with_order(mut self, order: Vec<OrderItem>) -> Self {
        self.order = order;
        self
    }

    /// Builder-style group setter.
    #[must_use]
    pub fn with_group(mut self, group: Grouping) -> Self {
        self.group = Some(group);
        self
    }

    /// Builder-style limit setter.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder-style offset setter.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direction_defaults_to_asc() {
        assert_eq!(Direction::default(), Direction::Asc);
        let item: OrderItem =
            serde_json::from_value(json!({ "property": "name" })).expect("deserialize");
        assert_eq!(item.direction, Direction::Asc);
    }

    #[test]
    fn order_item_round_trips() {
        let item = OrderItem::desc("yearIntroduced");
        let as_json = serde_json::to_value(&item).expect("serialize");
        assert_eq!(
            as_json,
            json!({ "property": "yearIntroduced", "direction": "desc" })
        );
    }

    #[test]
    fn select_entry_helpers() {
        let attr = SelectEntry::attribute("name");
        assert_eq!(attr.name, "name");
        assert_eq!(attr.kind, SelectKind::Attribute("name".into()));

        let renamed = SelectEntry::renamed("bearName", "name");
        assert_eq!(renamed.name, "bearName");
        assert_eq!(renamed.kind, SelectKind::Attribute("name".into()));
    }

    #[test]
    fn query_builder_composes() {
        let q = Query::of("bears")
            .with_constraint("yearIntroduced", json!({ "$gte": 2000 }))
            .with_order(vec![OrderItem::asc("name")])
            .with_limit(10)
            .with_offset(5);

        assert_eq!(q.ty, "bears");
        assert!(q.id.is_none());
        assert_eq!(q.constraints.len(), 1);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, 5);
    }

    #[test]
    fn grouping_defaults_to_by_fields() {
        let g = Grouping::by(["ageGroup"]);
        assert_eq!(g.by, vec!["ageGroup".to_string()]);
        assert!(g.select.is_none());
    }
}
