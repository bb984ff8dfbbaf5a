//! # Meta Graph Model
//!
//! Plain types shared by every part of the engine: data values, the
//! specification tree, per-node state and the meta node itself.
//!
//! Design rule: nothing here walks the graph. Construction, rebase and commit
//! live in `graph`; this module is pure data.

pub mod node;
pub mod spec;
pub mod state;
pub mod value;

pub use node::{MetaId, MetaNode, Position, Shape};
pub use spec::{MetaFn, Spec, SpecShape, Term, RESERVED_FIELD_NAMES};
pub use state::State;
pub use value::{ArrayRef, ObjectRef, Value, ValueKey};
