//! # quiver-core
//!
//! The schema-driven Resource Graph Engine for Quiver - THE ENGINE.
//!
//! This crate implements a normalized typed-record store with
//! declaratively-maintained relationships, queried through a declarative
//! query language supporting selection, filtering, relationship traversal,
//! grouping, and ordering. Storage adapters share one query semantics over
//! different physical backends; this crate ships the storage trait and the
//! in-memory reference adapter.
//!
//! ## Components (leaf-first)
//!
//! - `expression`: pure evaluator of declarative expression trees
//! - `quiver`: schema-unaware transactional node/arrow store with diffs
//! - `graph`: schema-aware wrapper synchronizing inverse relationships
//! - `evaluator`: executes a query tree against a resource store
//!
//! ## Architectural Constraints
//!
//! The ENGINE:
//! - Exclusively owns node/arrow storage; callers see diffs and query
//!   results, never internal graph structures
//! - Maintains inverse consistency immediately after every mutation, never
//!   eventually
//! - Suspends only at the storage fetch boundary; filtering, grouping,
//!   ordering, and expression evaluation are synchronous pure computation
//! - Assumes a single writer; readers observe pre- or fully-post-transaction
//!   state, never partial state

// =============================================================================
// MODULES
// =============================================================================

pub mod evaluator;
pub mod expression;
pub mod graph;
pub mod primitives;
pub mod query;
pub mod quiver;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AttributeSchema, Attributes, Cardinality, QuiverError, RelValue, RelationshipSchema, Resource,
    ResourceRef, ResourceSchema, Schema,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use expression::{CompiledExpression, compile, evaluate as evaluate_expression, is_expression};
pub use graph::ResourceGraph;
pub use quiver::{Arrow, ArrowGroup, Diff, NodeChange, Quiver, Transaction};

// =============================================================================
// RE-EXPORTS: Query Surface
// =============================================================================

pub use evaluator::evaluate;
pub use query::{Direction, GroupSelectEntry, Grouping, OrderItem, Query, SelectEntry, SelectKind};
pub use storage::{MemoryStore, ResourceStore};
