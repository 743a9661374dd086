//! # Query Evaluator
//!
//! Executes a validated query tree against a resource store.
//!
//! Root resolution and relationship traversal go through the async
//! [`ResourceStore`] boundary and may suspend; constraint filtering,
//! grouping, ordering, and selection shaping are synchronous pure
//! computation over already-materialized data.
//!
//! Every failure aborts the whole evaluation at detection point; no partial
//! results are returned. Unrecognized constraint values fall back only to
//! the literal-equality rule, never to silent omission.

use crate::expression::{self, CompiledExpression};
use crate::primitives::MAX_RELATIONSHIP_DEPTH;
use crate::query::{Direction, GroupSelectEntry, Grouping, OrderItem, Query, SelectEntry, SelectKind};
use crate::storage::ResourceStore;
use crate::types::{
    Attributes, Cardinality, QuiverError, RelValue, Resource, ResourceRef, ResourceSchema, Schema,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Evaluate a query tree, returning a shaped result.
///
/// A single-id query yields one shaped object, or `null` when constraints
/// reject the fetched resource. A collection query yields an ordered array
/// of shaped objects (grouped rows when `group` is present).
pub async fn evaluate(
    schema: &Schema,
    query: &Query,
    store: &dyn ResourceStore,
) -> Result<Value, QuiverError> {
    debug!(ty = %query.ty, id = ?query.id, "evaluating query");
    evaluate_node(schema, query, store, 0).await
}

fn evaluate_node<'a>(
    schema: &'a Schema,
    query: &'a Query,
    store: &'a dyn ResourceStore,
    depth: usize,
) -> BoxFuture<'a, Result<Value, QuiverError>> {
    Box::pin(async move {
        let Some(ty_schema) = schema.resource(&query.ty) else {
            return Err(QuiverError::InvalidQuery(format!(
                "unknown resource type '{}'",
                query.ty
            )));
        };

        if let Some(id) = &query.id {
            if !query.order.is_empty() {
                return Err(QuiverError::InvalidQuery(
                    "order requires a resource collection".to_string(),
                ));
            }
            if query.group.is_some() {
                return Err(QuiverError::InvalidQuery(
                    "group requires a resource collection".to_string(),
                ));
            }

            let target = ResourceRef::new(&query.ty, id);
            let Some(resource) = store.fetch(&target).await? else {
                return Err(QuiverError::NotFound(target));
            };
            let constraints = compile_constraints(ty_schema, query)?;
            if !passes(&constraints, &resource)? {
                return Ok(Value::Null);
            }
            let select = effective_select(ty_schema, &query.select);
            return shape_resource(schema, ty_schema, &resource, &select, store, depth).await;
        }

        let resources = store.fetch_type(&query.ty).await?;
        evaluate_collection(schema, ty_schema, query, store, resources, depth).await
    })
}

// =============================================================================
// COLLECTION PIPELINE
// =============================================================================

/// Filter, order, group or shape, and paginate a candidate collection.
///
/// Used both for full-type scans and for relationship traversal, where the
/// candidates are the arrow group's targets rather than the whole type.
async fn evaluate_collection(
    schema: &Schema,
    ty_schema: &ResourceSchema,
    query: &Query,
    store: &dyn ResourceStore,
    resources: Vec<Resource>,
    depth: usize,
) -> Result<Value, QuiverError> {
    let constraints = compile_constraints(ty_schema, query)?;
    let mut kept = Vec::with_capacity(resources.len());
    for resource in resources {
        if passes(&constraints, &resource)? {
            kept.push(resource);
        }
    }

    if !query.order.is_empty() {
        sort_resources(ty_schema, &query.ty, &query.order, &mut kept)?;
    }

    if let Some(grouping) = &query.group {
        let rows = group_rows(ty_schema, &query.ty, grouping, &kept)?;
        return Ok(Value::Array(paginate(rows, query.offset, query.limit)));
    }

    let page = paginate(kept, query.offset, query.limit);
    let select = effective_select(ty_schema, &query.select);
    let mut shaped = Vec::with_capacity(page.len());
    for resource in &page {
        shaped.push(shape_resource(schema, ty_schema, resource, &select, store, depth).await?);
    }
    Ok(Value::Array(shaped))
}

fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let mut page: Vec<T> = items.into_iter().skip(offset).collect();
    if let Some(limit) = limit {
        page.truncate(limit);
    }
    page
}

// =============================================================================
// CONSTRAINTS
// =============================================================================

enum Constraint {
    /// Comparison operator object, compiled against the field's value.
    Field { field: String, expr: CompiledExpression },
    /// A full expression, evaluated with the whole resource as input.
    Whole(CompiledExpression),
    /// Anything else: deep structural equality against the field's value.
    Literal { field: String, value: Value },
}

fn compile_constraints(
    ty_schema: &ResourceSchema,
    query: &Query,
) -> Result<Vec<Constraint>, QuiverError> {
    let mut compiled = Vec::with_capacity(query.constraints.len());
    for (field, value) in &query.constraints {
        if expression::is_comparison_expression(value) {
            require_field(ty_schema, &query.ty, field)?;
            compiled.push(Constraint::Field {
                field: field.clone(),
                expr: expression::compile(value)?,
            });
        } else if expression::is_expression(value) {
            compiled.push(Constraint::Whole(expression::compile(value)?));
        } else {
            require_field(ty_schema, &query.ty, field)?;
            compiled.push(Constraint::Literal {
                field: field.clone(),
                value: value.clone(),
            });
        }
    }
    Ok(compiled)
}

/// All predicates must pass (logical AND).
fn passes(constraints: &[Constraint], resource: &Resource) -> Result<bool, QuiverError> {
    for constraint in constraints {
        let pass = match constraint {
            Constraint::Field { field, expr } => {
                expression::is_truthy(&expr.run(&field_value(resource, field))?)
            }
            Constraint::Whole(expr) => {
                expression::is_truthy(&expr.run(&resource_json(resource))?)
            }
            Constraint::Literal { field, value } => field_value(resource, field) == *value,
        };
        if !pass {
            return Ok(false);
        }
    }
    Ok(true)
}

// =============================================================================
// FIELD ACCESS
// =============================================================================

/// The value of a field on a resource: the reserved `id`, or an attribute.
/// A declared but unset attribute is `null`.
fn field_value(resource: &Resource, field: &str) -> Value {
    if field == crate::primitives::ID_ATTRIBUTE {
        return Value::String(resource.id.clone());
    }
    resource.attributes.get(field).cloned().unwrap_or(Value::Null)
}

/// The resource as expression input: `id`, every attribute, and every
/// relationship value. Relationship targets appear as `{type, id}` objects
/// (cardinality `one`: object or `null`; `many`: array), so whole-resource
/// expressions can test them with deep equality.
fn resource_json(resource: &Resource) -> Value {
    let mut map = Attributes::new();
    map.insert(
        crate::primitives::ID_ATTRIBUTE.to_string(),
        Value::String(resource.id.clone()),
    );
    for (name, value) in &resource.attributes {
        map.insert(name.clone(), value.clone());
    }
    for (name, value) in &resource.relationships {
        if !map.contains_key(name) {
            map.insert(name.clone(), rel_value_json(value));
        }
    }
    Value::Object(map)
}

fn rel_value_json(value: &RelValue) -> Value {
    match value {
        RelValue::One(None) => Value::Null,
        RelValue::One(Some(target)) => ref_json(target),
        RelValue::Many(targets) => Value::Array(targets.iter().map(ref_json).collect()),
    }
}

fn ref_json(target: &ResourceRef) -> Value {
    let mut map = Attributes::new();
    map.insert("type".to_string(), Value::String(target.ty.clone()));
    map.insert(
        crate::primitives::ID_ATTRIBUTE.to_string(),
        Value::String(target.id.clone()),
    );
    Value::Object(map)
}

fn require_field(
    ty_schema: &ResourceSchema,
    ty: &str,
    field: &str,
) -> Result<(), QuiverError> {
    if field == crate::primitives::ID_ATTRIBUTE || ty_schema.attributes.contains_key(field) {
        return Ok(());
    }
    Err(QuiverError::SchemaViolation(format!(
        "type '{ty}' has no attribute '{field}'"
    )))
}

// =============================================================================
// ORDERING
// =============================================================================

/// Multi-key stable sort: compare the first key, fall through to the next on
/// tie, preserve original relative order for remaining ties. `desc` reverses
/// only its own key's comparator.
fn sort_resources(
    ty_schema: &ResourceSchema,
    ty: &str,
    order: &[OrderItem],
    resources: &mut [Resource],
) -> Result<(), QuiverError> {
    for item in order {
        require_field(ty_schema, ty, &item.property)?;
        require_ordinal_column(&item.property, resources)?;
    }

    resources.sort_by(|a, b| {
        for item in order {
            let va = field_value(a, &item.property);
            let vb = field_value(b, &item.property);
            let mut ord = compare_ordinal(&va, &vb);
            if item.direction == Direction::Desc {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// An order key must be numeric or string valued consistently across the
/// whole collection; no coercion between the two.
fn require_ordinal_column(property: &str, resources: &[Resource]) -> Result<(), QuiverError> {
    let mut saw_number = false;
    let mut saw_string = false;
    for resource in resources {
        match field_value(resource, property) {
            Value::Number(_) => saw_number = true,
            Value::String(_) => saw_string = true,
            other => {
                return Err(QuiverError::InvalidQuery(format!(
                    "order property '{property}' has non-ordinal value {other}"
                )));
            }
        }
    }
    if saw_number && saw_string {
        return Err(QuiverError::InvalidQuery(format!(
            "order property '{property}' mixes numeric and string values"
        )));
    }
    Ok(())
}

fn compare_ordinal(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        // Column ordinality is validated before sorting.
        _ => Ordering::Equal,
    }
}

// =============================================================================
// GROUPING
// =============================================================================

/// Partition by the `by` tuple (structural equality), emitting distinct
/// tuples in first-encountered order, shaped per `group.select`.
fn group_rows(
    ty_schema: &ResourceSchema,
    ty: &str,
    grouping: &Grouping,
    resources: &[Resource],
) -> Result<Vec<Value>, QuiverError> {
    if grouping.by.is_empty() {
        return Err(QuiverError::InvalidQuery(
            "group.by must name at least one field".to_string(),
        ));
    }
    for field in &grouping.by {
        require_field(ty_schema, ty, field)?;
    }

    let mut tuples: Vec<Vec<Value>> = Vec::new();
    for resource in resources {
        let tuple: Vec<Value> = grouping
            .by
            .iter()
            .map(|field| field_value(resource, field))
            .collect();
        if !tuples.contains(&tuple) {
            tuples.push(tuple);
        }
    }

    let mut rows = Vec::with_capacity(tuples.len());
    for tuple in &tuples {
        rows.push(shape_group(grouping, tuple)?);
    }
    Ok(rows)
}

fn shape_group(grouping: &Grouping, tuple: &[Value]) -> Result<Value, QuiverError> {
    let by_value = |field: &str| -> Option<Value> {
        grouping
            .by
            .iter()
            .position(|f| f == field)
            .and_then(|i| tuple.get(i).cloned())
    };

    let mut row = Attributes::new();
    let Some(select) = &grouping.select else {
        // Default select: the by fields themselves.
        for (field, value) in grouping.by.iter().zip(tuple) {
            row.insert(field.clone(), value.clone());
        }
        return Ok(Value::Object(row));
    };

    for entry in select {
        match entry {
            GroupSelectEntry::All => {
                for (field, value) in grouping.by.iter().zip(tuple) {
                    row.insert(field.clone(), value.clone());
                }
            }
            GroupSelectEntry::Field { name, by_field } => {
                let Some(value) = by_value(by_field) else {
                    return Err(QuiverError::InvalidQuery(format!(
                        "group select field '{by_field}' is not in group.by"
                    )));
                };
                row.insert(name.clone(), value);
            }
            GroupSelectEntry::Computed { name, expr } => {
                for var in expression::var_names(expr) {
                    if !grouping.by.contains(&var) {
                        return Err(QuiverError::InvalidQuery(format!(
                            "group expression references '{var}' outside group.by"
                        )));
                    }
                }
                let compiled = expression::compile(expr)?;
                let mut context = Attributes::new();
                for (field, value) in grouping.by.iter().zip(tuple) {
                    context.insert(field.clone(), value.clone());
                }
                row.insert(name.clone(), compiled.run(&Value::Object(context))?);
            }
        }
    }
    Ok(Value::Object(row))
}

// =============================================================================
// SELECTION SHAPING
// =============================================================================

/// An empty select projects the full resource: `id` plus every declared
/// attribute, in declaration order.
fn effective_select(ty_schema: &ResourceSchema, select: &[SelectEntry]) -> Vec<SelectEntry> {
    if !select.is_empty() {
        return select.to_vec();
    }
    let mut entries = vec![SelectEntry::attribute(crate::primitives::ID_ATTRIBUTE)];
    entries.extend(ty_schema.attributes.keys().map(SelectEntry::attribute));
    entries
}

/// Shape one resource: exactly the requested fields, in requested order.
fn shape_resource<'a>(
    schema: &'a Schema,
    ty_schema: &'a ResourceSchema,
    resource: &'a Resource,
    select: &'a [SelectEntry],
    store: &'a dyn ResourceStore,
    depth: usize,
) -> BoxFuture<'a, Result<Value, QuiverError>> {
    Box::pin(async move {
        let mut out = Attributes::new();
        for entry in select {
            let value = match &entry.kind {
                SelectKind::Attribute(field) => {
                    require_field(ty_schema, &resource.ty, field)?;
                    field_value(resource, field)
                }
                SelectKind::Computed(expr) => {
                    expression::compile(expr)?.run(&resource_json(resource))?
                }
                SelectKind::Relationship(sub) => {
                    traverse_relationship(schema, ty_schema, resource, &entry.name, sub, store, depth)
                        .await?
                }
            };
            out.insert(entry.name.clone(), value);
        }
        Ok(Value::Object(out))
    })
}

/// Follow one relationship's arrow group into a recursive sub-query.
/// Cardinality `one` yields a single shaped object or `null`; `many` yields
/// an ordered sequence.
async fn traverse_relationship(
    schema: &Schema,
    ty_schema: &ResourceSchema,
    resource: &Resource,
    name: &str,
    sub: &Query,
    store: &dyn ResourceStore,
    depth: usize,
) -> Result<Value, QuiverError> {
    let Some(rel) = ty_schema.relationships.get(name) else {
        return Err(QuiverError::SchemaViolation(format!(
            "type '{}' has no relationship '{name}'",
            resource.ty
        )));
    };
    if sub.id.is_some() {
        return Err(QuiverError::InvalidQuery(format!(
            "relationship '{name}' sub-query cannot carry an id"
        )));
    }
    if depth + 1 > MAX_RELATIONSHIP_DEPTH {
        return Err(QuiverError::InvalidQuery(format!(
            "relationship nesting exceeds depth {MAX_RELATIONSHIP_DEPTH}"
        )));
    }
    let Some(rel_schema) = schema.resource(&rel.related_type) else {
        return Err(QuiverError::SchemaViolation(format!(
            "relationship '{name}' targets unknown type '{}'",
            rel.related_type
        )));
    };

    let targets = resource
        .relationships
        .get(name)
        .map(|value| value.targets())
        .unwrap_or_default();

    match rel.cardinality {
        Cardinality::One => {
            if !sub.order.is_empty() || sub.group.is_some() {
                return Err(QuiverError::InvalidQuery(format!(
                    "relationship '{name}' has cardinality one; order and group \
                     require a resource collection"
                )));
            }
            let Some(target) = targets.first() else {
                return Ok(Value::Null);
            };
            let Some(fetched) = store.fetch(target).await? else {
                return Ok(Value::Null);
            };
            let constraints = compile_constraints(rel_schema, sub)?;
            if !passes(&constraints, &fetched)? {
                return Ok(Value::Null);
            }
            let select = effective_select(rel_schema, &sub.select);
            shape_resource(schema, rel_schema, &fetched, &select, store, depth + 1).await
        }
        Cardinality::Many => {
            let mut candidates = Vec::with_capacity(targets.len());
            for target in &targets {
                if let Some(fetched) = store.fetch(target).await? {
                    candidates.push(fetched);
                }
            }
            evaluate_collection(schema, rel_schema, sub, store, candidates, depth + 1).await
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
