//! # Storage Boundary
//!
//! The async fetch boundary between the query evaluator and physical
//! backends. Adapters may perform suspendable I/O here; everything on the
//! evaluator's side of this trait is synchronous pure computation over
//! already-materialized data.
//!
//! Adapter failures surface as `QuiverError::Store`, propagated unchanged
//! and never retried by the engine.

use crate::types::{QuiverError, Resource, ResourceRef};
use async_trait::async_trait;

mod memory;

pub use memory::MemoryStore;

/// Read access to materialized resources.
///
/// Implementations must return fully-materialized resources: every declared
/// relationship present, to-many relationships as ordered sequences (empty
/// when no targets exist, never null).
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one resource by identity. `Ok(None)` means the resource does
    /// not exist; that is not an error at this boundary.
    async fn fetch(&self, target: &ResourceRef) -> Result<Option<Resource>, QuiverError>;

    /// Fetch all resources of one type in deterministic order.
    async fn fetch_type(&self, ty: &str) -> Result<Vec<Resource>, QuiverError>;
}
