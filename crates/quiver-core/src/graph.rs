//! # Resource Graph
//!
//! The schema-aware wrapper over the relationship graph.
//!
//! Relationships are frequently declared from one side only. This component
//! guarantees bidirectional consistency without requiring every caller to
//! update both sides: for every arrow whose relationship declares an inverse,
//! a matching reverse arrow exists under the inverse label immediately after
//! every mutation, never eventually. This is the engine's central
//! correctness property; the query evaluator's relationship traversal depends
//! on it.
//!
//! The resource graph exclusively owns node/arrow storage. External callers
//! see diffs and materialized resources, never internal graph structures.

use crate::quiver::{Arrow, Diff, Quiver};
use crate::types::{
    Cardinality, QuiverError, RelValue, Resource, ResourceRef, ResourceSchema, Schema,
};
use std::collections::BTreeMap;

/// Schema-aware resource storage with automatic inverse maintenance.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    schema: Schema,
    quiver: Quiver,
}

impl ResourceGraph {
    /// Create an empty resource graph governed by `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            quiver: Quiver::new(),
        }
    }

    /// The governing schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Check whether a resource exists.
    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.quiver.contains_node(target)
    }

    /// Total resource count.
    pub fn resource_count(&self) -> usize {
        self.quiver.node_count()
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Create or update a resource as one transaction.
    ///
    /// `updated` is a partial value: omitted relationship keys are left
    /// untouched, present keys fully replace their arrow group. `existing` is
    /// the caller's view of the stored resource (or `None` on creation); it
    /// drives inverse retraction for targets that were dropped, computed as a
    /// set difference keyed by id.
    ///
    /// Fails with `SchemaViolation` if an attribute or relationship key is
    /// undeclared for the resource's type, leaving the graph untouched.
    pub fn assert(
        &mut self,
        updated: &Resource,
        existing: Option<&Resource>,
    ) -> Result<Diff, QuiverError> {
        let ty_schema = self.schema.resource(&updated.ty).ok_or_else(|| {
            QuiverError::SchemaViolation(format!("unknown resource type '{}'", updated.ty))
        })?;

        validate_keys(ty_schema, updated)?;

        let schema = &self.schema;
        let source = updated.reference();
        let (_, diff) = self.quiver.transact(|tx| {
            tx.assert_node(source.clone(), updated.attributes.clone());

            for (name, value) in &updated.relationships {
                // Key presence was validated above.
                let Some(rel) = ty_schema.relationships.get(name) else {
                    continue;
                };
                let targets = normalize_targets(name, value, rel.cardinality, &rel.related_type)?;

                tx.assert_arrow_group(&source, &targets, name);

                if let Some(inverse) = &rel.inverse {
                    let inverse_is_one = schema
                        .relationship(&rel.related_type, inverse)
                        .is_some_and(|r| r.cardinality == Cardinality::One);
                    for target in &targets {
                        if inverse_is_one {
                            // Claiming a one-cardinality inverse displaces the
                            // previous holder: its own forward arrow goes, and
                            // the target's group becomes exactly this source.
                            let displaced: Vec<ResourceRef> = tx
                                .arrow_group(target, inverse)
                                .iter()
                                .filter(|held| **held != source)
                                .cloned()
                                .collect();
                            for old in displaced {
                                tx.retract_arrow(&Arrow::new(old, target.clone(), name));
                            }
                            tx.assert_arrow_group(target, std::slice::from_ref(&source), inverse);
                        } else {
                            tx.assert_arrow(&Arrow::new(target.clone(), source.clone(), inverse));
                        }
                    }
                    let dropped = existing
                        .and_then(|e| e.relationships.get(name))
                        .map(|old| old.targets())
                        .unwrap_or_default();
                    for old in dropped {
                        if !targets.iter().any(|t| t.id == old.id) {
                            let old_ref = ResourceRef::new(&rel.related_type, &old.id);
                            tx.retract_arrow(&Arrow::new(old_ref, source.clone(), inverse));
                        }
                    }
                }
            }
            Ok(())
        })?;

        Ok(diff)
    }

    /// Destroy a resource as one transaction: clears every arrow group,
    /// retracts matching inverse arrows, and removes the node with a cascade
    /// over all remaining incident arrows.
    ///
    /// Fails with `NotFound` if the resource is absent.
    pub fn retract(&mut self, target: &ResourceRef) -> Result<Diff, QuiverError> {
        if !self.quiver.contains_node(target) {
            return Err(QuiverError::NotFound(target.clone()));
        }
        let ty_schema = self
            .schema
            .resource(&target.ty)
            .ok_or_else(|| {
                QuiverError::SchemaViolation(format!("unknown resource type '{}'", target.ty))
            })?
            .clone();

        let (_, diff) = self.quiver.transact(|tx| {
            for (name, rel) in &ty_schema.relationships {
                let targets = tx.arrow_group(target, name).to_vec();
                tx.assert_arrow_group(target, &[], name);
                if let Some(inverse) = &rel.inverse {
                    for t in targets {
                        tx.retract_arrow(&Arrow::new(t, target.clone(), inverse));
                    }
                }
            }
            tx.retract_node(target);
            Ok(())
        })?;

        Ok(diff)
    }

    // =========================================================================
    // MATERIALIZATION
    // =========================================================================

    /// Materialize a stored resource: attributes plus every declared
    /// relationship. Cardinality `one` materializes as a single target or
    /// none; `many` as an ordered sequence, empty when no arrows exist and
    /// never null.
    pub fn resource(&self, target: &ResourceRef) -> Option<Resource> {
        let attributes = self.quiver.node_attributes(target)?.clone();
        let ty_schema = self.schema.resource(&target.ty)?;

        let mut relationships = BTreeMap::new();
        for (name, rel) in &ty_schema.relationships {
            let group = self.quiver.arrow_group(target, name);
            let value = match rel.cardinality {
                Cardinality::One => RelValue::One(group.first().cloned()),
                Cardinality::Many => RelValue::Many(group.to_vec()),
            };
            relationships.insert(name.clone(), value);
        }

        Some(Resource {
            ty: target.ty.clone(),
            id: target.id.clone(),
            attributes,
            relationships,
        })
    }

    /// Materialize all resources of one type, ordered by id.
    pub fn resources_of_type(&self, ty: &str) -> Vec<Resource> {
        self.quiver
            .nodes()
            .filter(|(node, _)| node.ty == ty)
            .filter_map(|(node, _)| self.resource(node))
            .collect()
    }
}

/// Reject undeclared attribute or relationship keys before any mutation, so
/// a schema violation leaves the graph untouched.
fn validate_keys(ty_schema: &ResourceSchema, resource: &Resource) -> Result<(), QuiverError> {
    for key in resource.attributes.keys() {
        if !ty_schema.attributes.contains_key(key) {
            return Err(QuiverError::SchemaViolation(format!(
                "type '{}' has no attribute '{}'",
                resource.ty, key
            )));
        }
    }
    for key in resource.relationships.keys() {
        if !ty_schema.relationships.contains_key(key) {
            return Err(QuiverError::SchemaViolation(format!(
                "type '{}' has no relationship '{}'",
                resource.ty, key
            )));
        }
    }
    Ok(())
}

/// Normalize relationship targets to `(related_type, id)` references per the
/// schema, enforcing the declared cardinality.
fn normalize_targets(
    name: &str,
    value: &RelValue,
    cardinality: Cardinality,
    related_type: &str,
) -> Result<Vec<ResourceRef>, QuiverError> {
    match (cardinality, value) {
        (Cardinality::One, RelValue::Many(_)) => Err(QuiverError::SchemaViolation(format!(
            "relationship '{name}' has cardinality one but was given a sequence"
        ))),
        (Cardinality::Many, RelValue::One(_)) => Err(QuiverError::SchemaViolation(format!(
            "relationship '{name}' has cardinality many but was given a single target"
        ))),
        _ => Ok(value
            .targets()
            .into_iter()
            .map(|t| ResourceRef::new(related_type, t.id))
            .collect()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn care_bears_schema() -> Schema {
        serde_json::from_value(json!({
            "title": "Care Bears",
            "resources": {
                "bears": {
                    "attributes": {
                        "name": { "type": "string" },
                        "yearIntroduced": { "type": "number" }
                    },
                    "relationships": {
                        "home": {
                            "relatedType": "homes",
                            "cardinality": "one",
                            "inverse": "residents"
                        },
                        "bestFriend": { "relatedType": "bears", "cardinality": "one" }
                    }
                },
                "homes": {
                    "attributes": { "name": { "type": "string" } },
                    "relationships": {
                        "residents": {
                            "relatedType": "bears",
                            "cardinality": "many",
                            "inverse": "home"
                        }
                    }
                }
            }
        }))
        .expect("schema")
    }

    fn bear(id: &str, name: &str) -> Resource {
        Resource::new("bears", id).with_attr("name", name)
    }

    #[test]
    fn assert_maintains_inverse_from_one_side() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph
            .assert(&Resource::new("homes", "1").with_attr("name", "Care-a-Lot"), None)
            .expect("assert home");

        let tenderheart = bear("1", "Tenderheart Bear").with_rel(
            "home",
            RelValue::One(Some(ResourceRef::new("homes", "1"))),
        );
        graph.assert(&tenderheart, None).expect("assert bear");

        let home = graph
            .resource(&ResourceRef::new("homes", "1"))
            .expect("home exists");
        assert_eq!(
            home.relationships["residents"],
            RelValue::Many(vec![ResourceRef::new("bears", "1")])
        );
    }

    #[test]
    fn assert_maintains_inverse_from_many_side() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&bear("1", "Cheer Bear"), None).expect("assert");
        graph.assert(&bear("2", "Wish Bear"), None).expect("assert");

        let home = Resource::new("homes", "1")
            .with_attr("name", "Care-a-Lot")
            .with_rel(
                "residents",
                RelValue::Many(vec![
                    ResourceRef::new("bears", "1"),
                    ResourceRef::new("bears", "2"),
                ]),
            );
        graph.assert(&home, None).expect("assert home");

        for id in ["1", "2"] {
            let b = graph
                .resource(&ResourceRef::new("bears", id))
                .expect("bear exists");
            assert_eq!(
                b.relationships["home"],
                RelValue::One(Some(ResourceRef::new("homes", "1")))
            );
        }
    }

    #[test]
    fn claiming_a_one_inverse_from_the_many_side_displaces_the_old_holder() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph
            .assert(&Resource::new("homes", "1").with_attr("name", "Care-a-Lot"), None)
            .expect("assert home");
        graph
            .assert(&Resource::new("homes", "2").with_attr("name", "Forest of Feelings"), None)
            .expect("assert home");
        let tenderheart = bear("1", "Tenderheart Bear").with_rel(
            "home",
            RelValue::One(Some(ResourceRef::new("homes", "1"))),
        );
        graph.assert(&tenderheart, None).expect("assert bear");

        // The second home claims the bear from its many side.
        let claim = Resource::new("homes", "2").with_rel(
            "residents",
            RelValue::Many(vec![ResourceRef::new("bears", "1")]),
        );
        graph.assert(&claim, None).expect("claim bear");

        let moved = graph
            .resource(&ResourceRef::new("bears", "1"))
            .expect("bear exists");
        assert_eq!(
            moved.relationships["home"],
            RelValue::One(Some(ResourceRef::new("homes", "2")))
        );

        let old_home = graph
            .resource(&ResourceRef::new("homes", "1"))
            .expect("home exists");
        assert_eq!(old_home.relationships["residents"], RelValue::Many(vec![]));

        let new_home = graph
            .resource(&ResourceRef::new("homes", "2"))
            .expect("home exists");
        assert_eq!(
            new_home.relationships["residents"],
            RelValue::Many(vec![ResourceRef::new("bears", "1")])
        );
    }

    #[test]
    fn dropped_targets_lose_their_inverse_arrow() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&bear("1", "Cheer Bear"), None).expect("assert");
        graph.assert(&bear("2", "Wish Bear"), None).expect("assert");

        let home_v1 = Resource::new("homes", "1").with_rel(
            "residents",
            RelValue::Many(vec![
                ResourceRef::new("bears", "1"),
                ResourceRef::new("bears", "2"),
            ]),
        );
        graph.assert(&home_v1, None).expect("assert home");

        // Drop bear 1 from the residents list.
        let home_v2 = Resource::new("homes", "1").with_rel(
            "residents",
            RelValue::Many(vec![ResourceRef::new("bears", "2")]),
        );
        graph.assert(&home_v2, Some(&home_v1)).expect("update home");

        let dropped = graph
            .resource(&ResourceRef::new("bears", "1"))
            .expect("bear exists");
        assert_eq!(dropped.relationships["home"], RelValue::One(None));

        let kept = graph
            .resource(&ResourceRef::new("bears", "2"))
            .expect("bear exists");
        assert_eq!(
            kept.relationships["home"],
            RelValue::One(Some(ResourceRef::new("homes", "1")))
        );
    }

    #[test]
    fn one_directional_relationship_keeps_no_back_arrow() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&bear("1", "Tenderheart Bear"), None).expect("assert");
        let with_friend = bear("2", "Cheer Bear").with_rel(
            "bestFriend",
            RelValue::One(Some(ResourceRef::new("bears", "1"))),
        );
        graph.assert(&with_friend, None).expect("assert");

        let friend = graph
            .resource(&ResourceRef::new("bears", "1"))
            .expect("bear exists");
        assert_eq!(friend.relationships["bestFriend"], RelValue::One(None));
    }

    #[test]
    fn undeclared_relationship_fails_without_partial_state() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        let bad = bear("1", "Tenderheart Bear").with_rel(
            "nemesis",
            RelValue::One(Some(ResourceRef::new("bears", "2"))),
        );

        let err = graph.assert(&bad, None).expect_err("should fail");
        assert!(matches!(err, QuiverError::SchemaViolation(_)));
        assert!(!graph.contains(&ResourceRef::new("bears", "1")));
    }

    #[test]
    fn undeclared_attribute_fails() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        let bad = Resource::new("bears", "1").with_attr("fluffiness", 11);
        let err = graph.assert(&bad, None).expect_err("should fail");
        assert!(matches!(err, QuiverError::SchemaViolation(_)));
    }

    #[test]
    fn cardinality_mismatch_fails() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        let bad = bear("1", "Tenderheart Bear").with_rel(
            "home",
            RelValue::Many(vec![ResourceRef::new("homes", "1")]),
        );
        let err = graph.assert(&bad, None).expect_err("should fail");
        assert!(matches!(err, QuiverError::SchemaViolation(_)));
    }

    #[test]
    fn retract_missing_resource_fails() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        let err = graph
            .retract(&ResourceRef::new("bears", "404"))
            .expect_err("should fail");
        assert!(matches!(err, QuiverError::NotFound(_)));
    }

    #[test]
    fn retract_clears_inverse_membership() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&Resource::new("homes", "1"), None).expect("assert");
        let tenderheart = bear("1", "Tenderheart Bear").with_rel(
            "home",
            RelValue::One(Some(ResourceRef::new("homes", "1"))),
        );
        graph.assert(&tenderheart, None).expect("assert");

        graph
            .retract(&ResourceRef::new("bears", "1"))
            .expect("retract");

        // Sole member removed: the to-many side is an empty sequence, not null.
        let home = graph
            .resource(&ResourceRef::new("homes", "1"))
            .expect("home exists");
        assert_eq!(home.relationships["residents"], RelValue::Many(vec![]));
    }

    #[test]
    fn idempotent_assert_produces_empty_diff() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        let home = Resource::new("homes", "1").with_attr("name", "Care-a-Lot");
        let first = graph.assert(&home, None).expect("assert");
        assert!(!first.is_empty());

        let second = graph.assert(&home, Some(&home)).expect("assert");
        assert!(second.is_empty(), "second diff: {second:?}");
    }

    #[test]
    fn partial_update_leaves_omitted_relationships_untouched() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&Resource::new("homes", "1"), None).expect("assert");
        let v1 = bear("1", "Tenderheart Bear").with_rel(
            "home",
            RelValue::One(Some(ResourceRef::new("homes", "1"))),
        );
        graph.assert(&v1, None).expect("assert");

        // Attribute-only update, no relationship keys present.
        let v2 = bear("1", "Tenderheart Bear II");
        graph.assert(&v2, Some(&v1)).expect("update");

        let stored = graph
            .resource(&ResourceRef::new("bears", "1"))
            .expect("bear exists");
        assert_eq!(stored.attributes["name"], json!("Tenderheart Bear II"));
        assert_eq!(
            stored.relationships["home"],
            RelValue::One(Some(ResourceRef::new("homes", "1")))
        );
    }

    #[test]
    fn materialization_orders_by_id() {
        let mut graph = ResourceGraph::new(care_bears_schema());
        graph.assert(&bear("2", "Wish Bear"), None).expect("assert");
        graph.assert(&bear("1", "Cheer Bear"), None).expect("assert");

        let ids: Vec<String> = graph
            .resources_of_type("bears")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }
}
