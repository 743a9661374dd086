//! # Relationship Graph ("Quiver")
//!
//! The schema-unaware transactional node/arrow store.
//!
//! Nodes are opaque identities with an attribute payload. Arrows are directed
//! labeled edges; all arrows sharing `(source, label)` form an arrow group,
//! the current value of one relationship. All mutation happens inside an
//! explicit [`Transaction`]: `begin` → operations → `commit`/`rollback`. The
//! transaction holds the graph's only mutable borrow, so no reader can
//! observe partial state; rollback restores the exact pre-transaction state.
//!
//! All storage uses `BTreeMap` for deterministic iteration order.

use crate::types::{Attributes, QuiverError, ResourceRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// =============================================================================
// ARROWS & DIFFS
// =============================================================================

/// A directed, labeled edge: one relationship assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Arrow {
    /// The node the arrow leaves from.
    pub source: ResourceRef,
    /// The node the arrow points at.
    pub target: ResourceRef,
    /// The relationship name this arrow belongs to.
    pub label: String,
}

impl Arrow {
    /// Create a new arrow.
    pub fn new(source: ResourceRef, target: ResourceRef, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
        }
    }
}

/// The full asserted value of one `(source, label)` arrow group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowGroup {
    /// The shared source node.
    pub source: ResourceRef,
    /// The shared relationship name.
    pub label: String,
    /// The ordered targets.
    pub targets: Vec<ResourceRef>,
}

/// A node upsert recorded in a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeChange {
    /// The node identity.
    pub node: ResourceRef,
    /// The attribute payload after the change.
    pub attributes: Attributes,
}

/// Changes accumulated by one transaction, computed against the
/// pre-transaction state at commit time.
///
/// Asserting a value identical to the pre-transaction state records nothing,
/// so re-asserting an unchanged resource yields an empty diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    /// Nodes created or whose attributes changed.
    pub asserted_nodes: Vec<NodeChange>,
    /// Nodes removed.
    pub retracted_nodes: Vec<ResourceRef>,
    /// Arrow groups whose value changed, with their full new value.
    pub asserted_arrow_groups: Vec<ArrowGroup>,
    /// Individual arrows removed, including group-replacement removals and
    /// node-retraction cascades.
    pub retracted_arrows: Vec<Arrow>,
}

impl Diff {
    /// True if the transaction changed nothing.
    pub fn is_empty(&self) -> bool {
        self.asserted_nodes.is_empty()
            && self.retracted_nodes.is_empty()
            && self.asserted_arrow_groups.is_empty()
            && self.retracted_arrows.is_empty()
    }
}

// =============================================================================
// QUIVER
// =============================================================================

/// The schema-unaware transactional node/arrow store.
#[derive(Debug, Clone, Default)]
pub struct Quiver {
    /// Node storage: identity → attribute payload.
    nodes: BTreeMap<ResourceRef, Attributes>,
    /// Arrow storage: source → label → ordered targets.
    arrows: BTreeMap<ResourceRef, BTreeMap<String, Vec<ResourceRef>>>,
    /// Reverse index: target → set of `(source, label)` pairs pointing at it.
    /// Maintained for cascade deletion of incident arrows.
    incoming: BTreeMap<ResourceRef, BTreeSet<(ResourceRef, String)>>,
}

impl Quiver {
    /// Create a new empty quiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a node exists.
    pub fn contains_node(&self, node: &ResourceRef) -> bool {
        self.nodes.contains_key(node)
    }

    /// Get a node's attribute payload.
    pub fn node_attributes(&self, node: &ResourceRef) -> Option<&Attributes> {
        self.nodes.get(node)
    }

    /// All nodes in deterministic order.
    pub fn nodes(&self) -> impl Iterator<Item = (&ResourceRef, &Attributes)> {
        self.nodes.iter()
    }

    /// The current arrow group under `(source, label)`, empty if absent.
    pub fn arrow_group(&self, source: &ResourceRef, label: &str) -> &[ResourceRef] {
        self.arrows
            .get(source)
            .and_then(|groups| groups.get(label))
            .map_or(&[], Vec::as_slice)
    }

    /// The labels of all non-empty arrow groups leaving `source`.
    pub fn arrow_labels(&self, source: &ResourceRef) -> impl Iterator<Item = &str> {
        self.arrows
            .get(source)
            .into_iter()
            .flat_map(|groups| groups.keys().map(String::as_str))
    }

    /// Total node count.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total arrow count.
    pub fn arrow_count(&self) -> usize {
        self.arrows
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Open a transaction. The handle holds the graph's only mutable borrow
    /// until committed or rolled back.
    pub fn begin(&mut self) -> Transaction<'_> {
        let snapshot = self.clone();
        Transaction {
            quiver: self,
            snapshot: Some(snapshot),
        }
    }

    /// Run a mutation block as one transaction: commit on `Ok`, roll the
    /// graph back to its pre-transaction state on `Err`.
    pub fn transact<T, F>(&mut self, f: F) -> Result<(T, Diff), QuiverError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, QuiverError>,
    {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                let diff = tx.commit();
                Ok((value, diff))
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    fn compute_diff(before: &Quiver, after: &Quiver) -> Diff {
        let mut diff = Diff::default();

        for (node, attributes) in &after.nodes {
            if before.nodes.get(node) != Some(attributes) {
                diff.asserted_nodes.push(NodeChange {
                    node: node.clone(),
                    attributes: attributes.clone(),
                });
            }
        }
        for node in before.nodes.keys() {
            if !after.nodes.contains_key(node) {
                diff.retracted_nodes.push(node.clone());
            }
        }

        for (source, groups) in &after.arrows {
            for (label, targets) in groups {
                if before.arrow_group(source, label) != targets.as_slice() {
                    diff.asserted_arrow_groups.push(ArrowGroup {
                        source: source.clone(),
                        label: label.clone(),
                        targets: targets.clone(),
                    });
                }
            }
        }

        for (source, groups) in &before.arrows {
            for (label, targets) in groups {
                let after_group = after.arrow_group(source, label);
                for target in targets {
                    if !after_group.contains(target) {
                        diff.retracted_arrows.push(Arrow {
                            source: source.clone(),
                            target: target.clone(),
                            label: label.clone(),
                        });
                    }
                }
            }
        }

        diff
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// An open transaction against a [`Quiver`].
///
/// Mutations apply directly to the graph; the handle keeps a snapshot of the
/// pre-transaction state for diff computation and rollback. Dropping the
/// handle without committing rolls the graph back, so mutations only persist
/// through an explicit [`Transaction::commit`].
#[derive(Debug)]
pub struct Transaction<'a> {
    quiver: &'a mut Quiver,
    /// `None` once committed; `Drop` restores any remaining snapshot.
    snapshot: Option<Quiver>,
}

impl Transaction<'_> {
    /// Idempotent node upsert. A payload identical to the current one is a
    /// no-op.
    pub fn assert_node(&mut self, node: ResourceRef, attributes: Attributes) {
        if self.quiver.nodes.get(&node) == Some(&attributes) {
            return;
        }
        self.quiver.nodes.insert(node, attributes);
    }

    /// Replace the full arrow set under `(source, label)`. Targets absent
    /// from the new value are retracted.
    pub fn assert_arrow_group(&mut self, source: &ResourceRef, targets: &[ResourceRef], label: &str) {
        let old = self.quiver.arrow_group(source, label).to_vec();
        if old == targets {
            return;
        }

        for removed in old.iter().filter(|t| !targets.contains(t)) {
            remove_incoming(&mut self.quiver.incoming, removed, source, label);
        }
        for target in targets {
            self.quiver
                .incoming
                .entry(target.clone())
                .or_default()
                .insert((source.clone(), label.to_string()));
        }

        if targets.is_empty() {
            if let Some(groups) = self.quiver.arrows.get_mut(source) {
                groups.remove(label);
                if groups.is_empty() {
                    self.quiver.arrows.remove(source);
                }
            }
        } else {
            self.quiver
                .arrows
                .entry(source.clone())
                .or_default()
                .insert(label.to_string(), targets.to_vec());
        }
    }

    /// Add one arrow without touching the rest of its group. Asserting an
    /// arrow already present is a no-op.
    pub fn assert_arrow(&mut self, arrow: &Arrow) {
        let group = self
            .quiver
            .arrows
            .entry(arrow.source.clone())
            .or_default()
            .entry(arrow.label.clone())
            .or_default();
        if group.contains(&arrow.target) {
            return;
        }
        group.push(arrow.target.clone());
        self.quiver
            .incoming
            .entry(arrow.target.clone())
            .or_default()
            .insert((arrow.source.clone(), arrow.label.clone()));
    }

    /// Remove one arrow without touching the rest of its group. Retracting an
    /// absent arrow is a no-op, not an error.
    pub fn retract_arrow(&mut self, arrow: &Arrow) {
        let Some(groups) = self.quiver.arrows.get_mut(&arrow.source) else {
            return;
        };
        let Some(group) = groups.get_mut(&arrow.label) else {
            return;
        };
        let before = group.len();
        group.retain(|t| t != &arrow.target);
        if group.len() == before {
            return;
        }
        if group.is_empty() {
            groups.remove(&arrow.label);
            if groups.is_empty() {
                self.quiver.arrows.remove(&arrow.source);
            }
        }
        remove_incoming(&mut self.quiver.incoming, &arrow.target, &arrow.source, &arrow.label);
    }

    /// Remove a node and all incident arrows, both directions.
    pub fn retract_node(&mut self, node: &ResourceRef) {
        if let Some(groups) = self.quiver.arrows.remove(node) {
            for (label, targets) in groups {
                for target in targets {
                    remove_incoming(&mut self.quiver.incoming, &target, node, &label);
                }
            }
        }

        if let Some(sources) = self.quiver.incoming.remove(node) {
            for (source, label) in sources {
                if let Some(groups) = self.quiver.arrows.get_mut(&source) {
                    if let Some(group) = groups.get_mut(&label) {
                        group.retain(|t| t != node);
                        if group.is_empty() {
                            groups.remove(&label);
                        }
                    }
                    if groups.is_empty() {
                        self.quiver.arrows.remove(&source);
                    }
                }
            }
        }

        self.quiver.nodes.remove(node);
    }

    /// Check whether a node exists in the transaction's current state.
    pub fn contains_node(&self, node: &ResourceRef) -> bool {
        self.quiver.contains_node(node)
    }

    /// The current arrow group under `(source, label)` as of this
    /// transaction's mutations.
    pub fn arrow_group(&self, source: &ResourceRef, label: &str) -> &[ResourceRef] {
        self.quiver.arrow_group(source, label)
    }

    /// Changes since transaction start, computed against the snapshot.
    pub fn diff(&self) -> Diff {
        match &self.snapshot {
            Some(snapshot) => Quiver::compute_diff(snapshot, self.quiver),
            None => Diff::default(),
        }
    }

    /// Commit, returning the accumulated diff.
    pub fn commit(mut self) -> Diff {
        let diff = self.diff();
        // Disarm the drop rollback.
        self.snapshot = None;
        debug!(
            asserted_nodes = diff.asserted_nodes.len(),
            retracted_nodes = diff.retracted_nodes.len(),
            asserted_arrow_groups = diff.asserted_arrow_groups.len(),
            retracted_arrows = diff.retracted_arrows.len(),
            "transaction committed"
        );
        diff
    }

    /// Discard all mutations, restoring the pre-transaction state.
    pub fn rollback(mut self) {
        debug!("transaction rolled back");
        if let Some(snapshot) = self.snapshot.take() {
            *self.quiver = snapshot;
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            debug!("transaction dropped without commit; rolling back");
            *self.quiver = snapshot;
        }
    }
}

/// Drop `(source, label)` from a target's incoming set, pruning empty sets.
fn remove_incoming(
    incoming: &mut BTreeMap<ResourceRef, BTreeSet<(ResourceRef, String)>>,
    target: &ResourceRef,
    source: &ResourceRef,
    label: &str,
) {
    if let Some(sources) = incoming.get_mut(target) {
        sources.remove(&(source.clone(), label.to_string()));
        if sources.is_empty() {
            incoming.remove(target);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn r(ty: &str, id: &str) -> ResourceRef {
        ResourceRef::new(ty, id)
    }

    fn attrs(name: &str) -> Attributes {
        let mut map = Attributes::new();
        map.insert("name".to_string(), json!(name));
        map
    }

    #[test]
    fn assert_node_is_idempotent() {
        let mut quiver = Quiver::new();

        let (_, first) = quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Tenderheart Bear"));
                Ok(())
            })
            .expect("transact");
        assert_eq!(first.asserted_nodes.len(), 1);

        let (_, second) = quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Tenderheart Bear"));
                Ok(())
            })
            .expect("transact");
        assert!(second.is_empty());
    }

    #[test]
    fn assert_node_records_attribute_change() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Tenderheart Bear"));
                Ok(())
            })
            .expect("transact");

        let (_, diff) = quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Renamed Bear"));
                Ok(())
            })
            .expect("transact");
        assert_eq!(diff.asserted_nodes.len(), 1);
        assert_eq!(diff.asserted_nodes[0].attributes["name"], json!("Renamed Bear"));
    }

    #[test]
    fn arrow_group_replacement_retracts_absent_targets() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_arrow_group(
                    &r("homes", "1"),
                    &[r("bears", "1"), r("bears", "2")],
                    "residents",
                );
                Ok(())
            })
            .expect("transact");

        let (_, diff) = quiver
            .transact(|tx| {
                tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "2"), r("bears", "3")], "residents");
                Ok(())
            })
            .expect("transact");

        assert_eq!(diff.asserted_arrow_groups.len(), 1);
        assert_eq!(
            diff.retracted_arrows,
            vec![Arrow::new(r("homes", "1"), r("bears", "1"), "residents")]
        );
        assert_eq!(
            quiver.arrow_group(&r("homes", "1"), "residents"),
            &[r("bears", "2"), r("bears", "3")]
        );
    }

    #[test]
    fn asserting_identical_group_is_a_noop() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "1")], "residents");
                Ok(())
            })
            .expect("transact");

        let (_, diff) = quiver
            .transact(|tx| {
                tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "1")], "residents");
                Ok(())
            })
            .expect("transact");
        assert!(diff.is_empty());
    }

    #[test]
    fn retract_absent_arrow_is_a_noop() {
        let mut quiver = Quiver::new();
        let (_, diff) = quiver
            .transact(|tx| {
                tx.retract_arrow(&Arrow::new(r("homes", "1"), r("bears", "9"), "residents"));
                Ok(())
            })
            .expect("transact");
        assert!(diff.is_empty());
    }

    #[test]
    fn assert_arrow_leaves_rest_of_group_untouched() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "1")], "residents");
                tx.assert_arrow(&Arrow::new(r("homes", "1"), r("bears", "2"), "residents"));
                Ok(())
            })
            .expect("transact");

        assert_eq!(
            quiver.arrow_group(&r("homes", "1"), "residents"),
            &[r("bears", "1"), r("bears", "2")]
        );
    }

    #[test]
    fn retract_node_cascades_both_directions() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), Attributes::new());
                tx.assert_node(r("homes", "1"), Attributes::new());
                tx.assert_arrow_group(&r("bears", "1"), &[r("homes", "1")], "home");
                tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "1")], "residents");
                Ok(())
            })
            .expect("transact");

        let (_, diff) = quiver
            .transact(|tx| {
                tx.retract_node(&r("bears", "1"));
                Ok(())
            })
            .expect("transact");

        assert_eq!(diff.retracted_nodes, vec![r("bears", "1")]);
        // Outgoing "home" arrow and incoming "residents" arrow both retracted.
        assert_eq!(diff.retracted_arrows.len(), 2);
        assert!(quiver.arrow_group(&r("homes", "1"), "residents").is_empty());
        assert_eq!(quiver.arrow_count(), 0);
    }

    #[test]
    fn failed_transaction_rolls_back_completely() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Tenderheart Bear"));
                Ok(())
            })
            .expect("transact");

        let result: Result<((), Diff), QuiverError> = quiver.transact(|tx| {
            tx.assert_node(r("bears", "2"), attrs("Cheer Bear"));
            tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "2")], "residents");
            Err(QuiverError::Store("adapter failure".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(quiver.node_count(), 1);
        assert!(quiver.contains_node(&r("bears", "1")));
        assert!(!quiver.contains_node(&r("bears", "2")));
        assert!(quiver.arrow_group(&r("homes", "1"), "residents").is_empty());
    }

    #[test]
    fn diff_is_visible_mid_transaction() {
        let mut quiver = Quiver::new();
        let mut tx = quiver.begin();
        tx.assert_node(r("bears", "1"), Attributes::new());
        assert_eq!(tx.diff().asserted_nodes.len(), 1);
        tx.assert_arrow_group(&r("bears", "1"), &[r("homes", "1")], "home");
        assert_eq!(tx.diff().asserted_arrow_groups.len(), 1);
        let diff = tx.commit();
        assert!(!diff.is_empty());
    }

    #[test]
    fn dropping_an_uncommitted_transaction_rolls_back() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_node(r("bears", "1"), attrs("Tenderheart Bear"));
                Ok(())
            })
            .expect("transact");

        {
            let mut tx = quiver.begin();
            tx.assert_node(r("bears", "2"), attrs("Cheer Bear"));
            tx.assert_arrow_group(&r("homes", "1"), &[r("bears", "2")], "residents");
            // No commit: the handle goes out of scope here.
        }

        assert_eq!(quiver.node_count(), 1);
        assert!(!quiver.contains_node(&r("bears", "2")));
        assert!(quiver.arrow_group(&r("homes", "1"), "residents").is_empty());
    }

    #[test]
    fn assert_then_retract_in_one_transaction_yields_empty_diff() {
        let mut quiver = Quiver::new();
        let (_, diff) = quiver
            .transact(|tx| {
                tx.assert_arrow(&Arrow::new(r("homes", "1"), r("bears", "1"), "residents"));
                tx.retract_arrow(&Arrow::new(r("homes", "1"), r("bears", "1"), "residents"));
                Ok(())
            })
            .expect("transact");
        assert!(diff.is_empty());
    }

    #[test]
    fn arrow_labels_lists_nonempty_groups() {
        let mut quiver = Quiver::new();
        quiver
            .transact(|tx| {
                tx.assert_arrow_group(&r("bears", "1"), &[r("homes", "1")], "home");
                tx.assert_arrow_group(&r("bears", "1"), &[r("powers", "1")], "powers");
                Ok(())
            })
            .expect("transact");

        let labels: Vec<&str> = quiver.arrow_labels(&r("bears", "1")).collect();
        assert_eq!(labels, vec!["home", "powers"]);
    }
}
