//! Meta node: one slot of the parallel graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::{Spec, State, Value};

/// Opaque meta node identifier, stable for the node's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaId(pub u64);

impl std::fmt::Display for MetaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an item node sits inside its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub sequence: MetaId,
    pub index: usize,
}

/// Structural children of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Child nodes by structural field name. Empty for leaves.
    Fields(HashMap<String, MetaId>),
    /// Ordered item nodes of a collection.
    Sequence(Vec<MetaId>),
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Fields(HashMap::new())
    }
}

impl Shape {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Shape::Sequence(_))
    }

    /// Every child id, fields and items alike.
    pub fn child_ids(&self) -> Vec<MetaId> {
        match self {
            Shape::Fields(fields) => fields.values().copied().collect(),
            Shape::Sequence(items) => items.clone(),
        }
    }
}

/// A node of the meta graph.
#[derive(Debug, Clone)]
pub struct MetaNode {
    pub(crate) id: MetaId,
    pub(crate) spec: Arc<Spec>,
    pub(crate) parent: Option<MetaId>,
    pub(crate) key: Option<String>,
    pub(crate) position: Option<Position>,
    pub(crate) state: State,
    pub(crate) shape: Shape,
    pub(crate) value: Value,
    pub(crate) calcs: BTreeMap<String, Value>,
}

impl MetaNode {
    pub(crate) fn new(id: MetaId, spec: Arc<Spec>) -> Self {
        Self {
            id,
            spec,
            parent: None,
            key: None,
            position: None,
            state: State::new(),
            shape: Shape::default(),
            value: Value::Null,
            calcs: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> MetaId { self.id }
    pub fn spec(&self) -> &Arc<Spec> { &self.spec }
    pub fn parent(&self) -> Option<MetaId> { self.parent }
    pub fn key(&self) -> Option<&str> { self.key.as_deref() }
    pub fn position(&self) -> Option<Position> { self.position }
    pub fn state(&self) -> &State { &self.state }
    pub fn shape(&self) -> &Shape { &self.shape }
    pub fn value(&self) -> &Value { &self.value }
    pub fn calcs(&self) -> &BTreeMap<String, Value> { &self.calcs }

    pub fn is_sequence(&self) -> bool {
        self.shape.is_sequence()
    }

    pub fn is_item(&self) -> bool {
        self.position.is_some()
    }

    /// Child node at a structural field.
    pub fn child(&self, key: &str) -> Option<MetaId> {
        match &self.shape {
            Shape::Fields(fields) => fields.get(key).copied(),
            Shape::Sequence(_) => None,
        }
    }

    /// Item nodes; empty unless this is a sequence.
    pub fn items(&self) -> &[MetaId] {
        match &self.shape {
            Shape::Sequence(items) => items,
            Shape::Fields(_) => &[],
        }
    }
}
