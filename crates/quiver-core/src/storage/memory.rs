//! In-memory storage adapter backed by a [`ResourceGraph`].
//!
//! The reference adapter: writes go through the resource graph's
//! transactional assert/retract, reads materialize resources on demand.
//! Single-writer; the lock serializes writers and readers observe pre- or
//! fully-post-transaction state, never partial state.

use super::ResourceStore;
use crate::graph::ResourceGraph;
use crate::quiver::Diff;
use crate::types::{QuiverError, Resource, ResourceRef, Schema};
use async_trait::async_trait;
use std::sync::RwLock;

/// In-memory resource store.
#[derive(Debug)]
pub struct MemoryStore {
    graph: RwLock<ResourceGraph>,
}

impl MemoryStore {
    /// Create an empty store governed by `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            graph: RwLock::new(ResourceGraph::new(schema)),
        }
    }

    /// Create or update a resource. The stored value supplies the previous
    /// state for inverse retraction.
    pub fn assert(&self, resource: &Resource) -> Result<Diff, QuiverError> {
        let mut graph = self.write_lock()?;
        let existing = graph.resource(&resource.reference());
        graph.assert(resource, existing.as_ref())
    }

    /// Destroy a resource, cascading inverse cleanup.
    pub fn retract(&self, target: &ResourceRef) -> Result<Diff, QuiverError> {
        self.write_lock()?.retract(target)
    }

    /// Total resource count.
    pub fn resource_count(&self) -> Result<usize, QuiverError> {
        Ok(self.read_lock()?.resource_count())
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, ResourceGraph>, QuiverError> {
        self.graph
            .read()
            .map_err(|_| QuiverError::Store("resource graph lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, ResourceGraph>, QuiverError> {
        self.graph
            .write()
            .map_err(|_| QuiverError::Store("resource graph lock poisoned".into()))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn fetch(&self, target: &ResourceRef) -> Result<Option<Resource>, QuiverError> {
        Ok(self.read_lock()?.resource(target))
    }

    async fn fetch_type(&self, ty: &str) -> Result<Vec<Resource>, QuiverError> {
        Ok(self.read_lock()?.resources_of_type(ty))
    }
}
