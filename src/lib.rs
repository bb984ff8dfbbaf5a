//! # metagraph: Meta Graph Engine
//!
//! Builds and maintains a parallel "meta" graph mirroring an arbitrary
//! nested data value node-for-node. Every meta node carries its
//! specification, its parent/key context, open extension state and a handle
//! to the data it represents.
//!
//! ## Design Principles
//!
//! 1. **Arena, not pointers**: nodes live in `MetaGraph` and are addressed by
//!    `MetaId`; parent/child links never create ownership cycles
//! 2. **Identity side map**: data containers find their node in O(1) without
//!    owning it, and the node never owns the data exclusively
//! 3. **Rebase keeps state**: rebuilding a subtree reuses slots by key and
//!    index, so extension state survives data replacement
//! 4. **Open extension**: setup hooks contribute state to every new node;
//!    the core never interprets it
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use metagraph::{MetaGraph, SetupRegistry, Spec, Value};
//!
//! # fn example() -> metagraph::Result<()> {
//! let spec = Spec::object()
//!     .field("name", Spec::leaf().term("label", "Name"))
//!     .field("tags", Spec::list(Spec::leaf()));
//!
//! let data = Value::from_json(serde_json::json!({"name": "Ada", "tags": ["x"]}));
//! let mut graph = MetaGraph::new(Arc::new(SetupRegistry::new()));
//! let root = graph.metafy(spec, data.clone())?;
//!
//! let name = graph.child(root, "name")?;
//! graph.set_value(name, "Grace")?;
//! assert_eq!(data.field("name"), Value::from("Grace"));
//! assert_eq!(graph.meta_of(&data)?, root);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod codec;
pub mod config;
pub mod graph;
pub mod model;
pub mod policies;
pub mod setup;

// ============================================================================
// Re-exports: Model
// ============================================================================

pub use model::{
    ArrayRef, MetaFn, MetaId, MetaNode, ObjectRef, Position, Shape, Spec, SpecShape, State, Term,
    Value, ValueKey,
};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use codec::{decode, default_state_predicate, encode, StatePredicate};
pub use config::GraphConfig;
pub use graph::MetaGraph;
pub use setup::{Extension, SetupHook, SetupRegistry};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    #[error("Malformed serialization: {0}")]
    MalformedSerialization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Maximum nesting depth exceeded at depth {0}")]
    DepthExceeded(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
