//! # Meta Graph Serialization
//!
//! Encodes a whole meta tree, including selected node state, to JSON text
//! and back. Intended for logging, monitoring, testing and automation; for
//! plain persistence, serializing the data value (`Value::to_json`) is
//! simpler and sufficient.
//!
//! The graph is cyclic (parents reference children and vice versa, data
//! containers may be shared), so everything is written as flat tables and
//! referenced by index:
//!
//! ```text
//! { "format": 1, "root": 0, "focus": 3,
//!   "nodes":      [ { "spec": 0, "parent": null, "shape": {...},
//!                     "value": {"Ref": 0}, "state": {...} }, ... ],
//!   "containers": [ { "Object": { "name": {"String": "Ada"} } }, ... ],
//!   "specs":      [ { "shape": {"Fields": [["name", 1]]}, "terms": {...} }, ... ] }
//! ```
//!
//! Each container and spec appears once no matter how often it is
//! referenced, and decodes to a single shared instance. Function-valued
//! spec terms and calculated fields cannot be written; pass a fresh spec to
//! `decode` to reattach them.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::graph::MetaGraph;
use crate::model::*;
use crate::{Error, Result};

/// Current document format version.
pub const FORMAT_VERSION: u32 = 1;

/// Decides which state entries are written.
pub type StatePredicate<'a> = &'a dyn Fn(&str, &Value) -> bool;

/// Keeps bool, number and string entries. Containers and nulls are
/// usually derived or cyclic, so they are left out.
pub fn default_state_predicate(_key: &str, value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_))
}

// ============================================================================
// Document model
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: u32,
    root: usize,
    focus: usize,
    nodes: Vec<EncodedNode>,
    containers: Vec<EncodedContainer>,
    specs: Vec<EncodedSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedNode {
    spec: usize,
    parent: Option<usize>,
    key: Option<String>,
    /// (sequence node, index) for items.
    position: Option<(usize, usize)>,
    shape: EncodedShape,
    value: EncodedValue,
    state: BTreeMap<String, EncodedValue>,
}

#[derive(Debug, Serialize, Deserialize)]
enum EncodedShape {
    Fields(BTreeMap<String, usize>),
    Sequence(Vec<usize>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum EncodedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ref(usize),
}

#[derive(Debug, Serialize, Deserialize)]
enum EncodedContainer {
    Object(BTreeMap<String, EncodedValue>),
    Array(Vec<EncodedValue>),
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedSpec {
    shape: EncodedSpecShape,
    terms: BTreeMap<String, EncodedValue>,
}

#[derive(Debug, Serialize, Deserialize)]
enum EncodedSpecShape {
    Leaf,
    Fields(Vec<(String, usize)>),
    Items(usize),
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode the tree containing `id`. `id` is recorded as the focus node and
/// is what `decode` returns.
pub fn encode(
    graph: &MetaGraph,
    id: MetaId,
    predicate: Option<StatePredicate<'_>>,
) -> Result<String> {
    let predicate = predicate.unwrap_or(&default_state_predicate);
    let root = graph.root_of(id)?;

    let mut encoder = Encoder {
        graph,
        predicate,
        node_index: HashMap::new(),
        container_index: HashMap::new(),
        spec_index: HashMap::new(),
        containers: Vec::new(),
        specs: Vec::new(),
    };

    let order = encoder.number_nodes(root)?;
    let nodes = order
        .iter()
        .map(|node| encoder.encode_node(*node))
        .collect::<Result<Vec<_>>>()?;

    let document = Document {
        format: FORMAT_VERSION,
        root: encoder.node_index[&root],
        focus: encoder.node_index[&id],
        nodes,
        containers: encoder
            .containers
            .into_iter()
            .map(|c| c.unwrap_or(EncodedContainer::Object(BTreeMap::new())))
            .collect(),
        specs: encoder
            .specs
            .into_iter()
            .map(|s| {
                s.unwrap_or(EncodedSpec { shape: EncodedSpecShape::Leaf, terms: BTreeMap::new() })
            })
            .collect(),
    };

    tracing::debug!(
        %id,
        nodes = document.nodes.len(),
        containers = document.containers.len(),
        "encoded meta graph"
    );
    serde_json::to_string(&document).map_err(|e| Error::Serialization(e.to_string()))
}

struct Encoder<'g, 'p> {
    graph: &'g MetaGraph,
    predicate: StatePredicate<'p>,
    node_index: HashMap<MetaId, usize>,
    container_index: HashMap<ValueKey, usize>,
    spec_index: HashMap<usize, usize>,
    containers: Vec<Option<EncodedContainer>>,
    specs: Vec<Option<EncodedSpec>>,
}

impl Encoder<'_, '_> {
    /// Pre-order numbering so parents precede children.
    fn number_nodes(&mut self, root: MetaId) -> Result<Vec<MetaId>> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if self.node_index.contains_key(&id) {
                continue;
            }
            self.node_index.insert(id, order.len());
            order.push(id);
            let graph = self.graph;
            let node = graph.node(id)?;
            let mut children = match node.shape() {
                Shape::Fields(fields) => {
                    let mut keyed: Vec<_> = fields.iter().collect();
                    keyed.sort_by(|a, b| a.0.cmp(b.0));
                    keyed.into_iter().map(|(_, child)| *child).collect()
                }
                Shape::Sequence(items) => items.clone(),
            };
            children.reverse();
            stack.extend(children);
        }
        Ok(order)
    }

    fn index_of(&self, id: MetaId) -> Result<usize> {
        self.node_index
            .get(&id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("Meta node {id} outside the encoded tree")))
    }

    fn encode_node(&mut self, id: MetaId) -> Result<EncodedNode> {
        let graph = self.graph;
        let node = graph.node(id)?;
        let shape = match node.shape() {
            Shape::Fields(fields) => EncodedShape::Fields(
                fields
                    .iter()
                    .map(|(k, child)| Ok((k.clone(), self.index_of(*child)?)))
                    .collect::<Result<_>>()?,
            ),
            Shape::Sequence(items) => EncodedShape::Sequence(
                items.iter().map(|item| self.index_of(*item)).collect::<Result<_>>()?,
            ),
        };
        let parent = node.parent().map(|p| self.index_of(p)).transpose()?;
        let position = node
            .position()
            .map(|pos| Ok::<_, Error>((self.index_of(pos.sequence)?, pos.index)))
            .transpose()?;
        let spec = self.encode_spec(node.spec());
        let value = self.encode_value(node.value());
        let kept: Vec<(&String, &Value)> = node
            .state()
            .iter()
            .filter(|(k, v)| (self.predicate)(k.as_str(), v))
            .collect();
        let state = kept
            .into_iter()
            .map(|(k, v)| (k.clone(), self.encode_value(v)))
            .collect();

        Ok(EncodedNode {
            spec,
            parent,
            key: node.key().map(str::to_string),
            position,
            shape,
            value,
            state,
        })
    }

    fn encode_value(&mut self, value: &Value) -> EncodedValue {
        match value {
            Value::Null => EncodedValue::Null,
            Value::Bool(b) => EncodedValue::Bool(*b),
            Value::Int(i) => EncodedValue::Int(*i),
            Value::Float(f) if f.is_finite() => EncodedValue::Float(*f),
            Value::Float(_) => EncodedValue::Null,
            Value::String(s) => EncodedValue::String(s.clone()),
            Value::Object(object) => {
                if let Some(index) = self.container_index.get(&object.key()) {
                    return EncodedValue::Ref(*index);
                }
                let index = self.reserve_container(object.key());
                let entries = object
                    .entries()
                    .iter()
                    .map(|(k, v)| (k.clone(), self.encode_value(v)))
                    .collect();
                self.containers[index] = Some(EncodedContainer::Object(entries));
                EncodedValue::Ref(index)
            }
            Value::Array(array) => {
                if let Some(index) = self.container_index.get(&array.key()) {
                    return EncodedValue::Ref(*index);
                }
                let index = self.reserve_container(array.key());
                let items = array.items().iter().map(|v| self.encode_value(v)).collect();
                self.containers[index] = Some(EncodedContainer::Array(items));
                EncodedValue::Ref(index)
            }
        }
    }

    fn reserve_container(&mut self, key: ValueKey) -> usize {
        let index = self.containers.len();
        self.containers.push(None);
        self.container_index.insert(key, index);
        index
    }

    fn encode_spec(&mut self, spec: &Arc<Spec>) -> usize {
        let key = Arc::as_ptr(spec) as usize;
        if let Some(index) = self.spec_index.get(&key) {
            return *index;
        }
        let index = self.specs.len();
        self.specs.push(None);
        self.spec_index.insert(key, index);

        let shape = match spec.shape() {
            SpecShape::Leaf => EncodedSpecShape::Leaf,
            SpecShape::Fields(fields) => EncodedSpecShape::Fields(
                fields.iter().map(|(k, s)| (k.clone(), self.encode_spec(s))).collect(),
            ),
            SpecShape::Items(items) => EncodedSpecShape::Items(self.encode_spec(items)),
        };
        let terms = spec
            .terms()
            .iter()
            .filter_map(|(k, term)| term.as_value().map(|v| (k.clone(), v)))
            .map(|(k, v)| (k, self.encode_value(v)))
            .collect();
        self.specs[index] = Some(EncodedSpec { shape, terms });
        index
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a document into `graph`, returning the focus node.
///
/// With `spec`, the decoded tree is rebased onto it (decoded state is kept,
/// setup hooks do not run). A document that fails to decode leaves `graph`
/// as it was.
pub fn decode(graph: &mut MetaGraph, text: &str, spec: Option<Arc<Spec>>) -> Result<MetaId> {
    let document: Document = serde_json::from_str(text)
        .map_err(|e| Error::MalformedSerialization(e.to_string()))?;
    if document.format != FORMAT_VERSION {
        return Err(Error::MalformedSerialization(format!(
            "unsupported format version {}",
            document.format
        )));
    }

    let containers = decode_containers(&document.containers)?;
    let specs = SpecDecoder::new(&document.specs, &containers).decode_all()?;

    let checkpoint = graph.checkpoint(&[], &[]);
    match restore(graph, &document, &specs, &containers, spec) {
        Ok(focus) => Ok(focus),
        Err(e) => {
            graph.rollback(checkpoint);
            Err(e)
        }
    }
}

/// Allocate and wire the document's nodes, then reattach `spec` if given.
fn restore(
    graph: &mut MetaGraph,
    document: &Document,
    specs: &[Arc<Spec>],
    containers: &[Value],
    spec: Option<Arc<Spec>>,
) -> Result<MetaId> {
    let node_count = document.nodes.len();
    let check = |index: usize, what: &str| -> Result<usize> {
        if index < node_count {
            Ok(index)
        } else {
            Err(Error::MalformedSerialization(format!("dangling {what} index {index}")))
        }
    };
    check(document.root, "root")?;
    check(document.focus, "focus")?;

    let mut ids = Vec::with_capacity(node_count);
    for encoded in &document.nodes {
        let spec = specs.get(encoded.spec).cloned().ok_or_else(|| {
            Error::MalformedSerialization(format!("dangling spec index {}", encoded.spec))
        })?;
        ids.push(graph.alloc(spec));
    }

    for (index, encoded) in document.nodes.iter().enumerate() {
        let id = ids[index];
        let parent = encoded.parent.map(|p| check(p, "parent").map(|p| ids[p])).transpose()?;
        let position = encoded
            .position
            .map(|(seq, i)| {
                check(seq, "sequence").map(|seq| Position { sequence: ids[seq], index: i })
            })
            .transpose()?;
        let shape = match &encoded.shape {
            EncodedShape::Fields(fields) => Shape::Fields(
                fields
                    .iter()
                    .map(|(k, c)| check(*c, "child").map(|c| (k.clone(), ids[c])))
                    .collect::<Result<_>>()?,
            ),
            EncodedShape::Sequence(items) => Shape::Sequence(
                items.iter().map(|i| check(*i, "item").map(|i| ids[i])).collect::<Result<_>>()?,
            ),
        };
        let value = resolve(&encoded.value, containers)?;
        let state = encoded
            .state
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve(v, containers)?)))
            .collect::<Result<State>>()?;

        let node = graph.node_mut(id)?;
        node.parent = parent;
        node.key = encoded.key.clone();
        node.position = position;
        node.shape = shape;
        node.state = state;
        graph.link_value(id, value)?;
    }

    let root = ids[document.root];
    let focus = ids[document.focus];
    tracing::debug!(%root, %focus, nodes = node_count, "decoded meta graph");

    if let Some(spec) = spec {
        graph.rebase_with_spec(root, spec, None)?;
        if !graph.contains(focus) {
            return Err(Error::NotFound(format!(
                "focus node {focus} has no counterpart in the reattached spec"
            )));
        }
    }
    Ok(focus)
}

fn decode_containers(encoded: &[EncodedContainer]) -> Result<Vec<Value>> {
    // Allocate every container first so references (including cycles)
    // resolve to the shared instance.
    let containers: Vec<Value> = encoded
        .iter()
        .map(|c| match c {
            EncodedContainer::Object(_) => Value::Object(ObjectRef::new()),
            EncodedContainer::Array(_) => Value::Array(ArrayRef::new()),
        })
        .collect();

    for (slot, encoded) in containers.iter().zip(encoded) {
        match (slot, encoded) {
            (Value::Object(object), EncodedContainer::Object(entries)) => {
                for (k, v) in entries {
                    object.insert(k.clone(), resolve(v, &containers)?);
                }
            }
            (Value::Array(array), EncodedContainer::Array(items)) => {
                let items = items.iter().map(|v| resolve(v, &containers)).collect::<Result<_>>()?;
                array.replace(items);
            }
            _ => {
                return Err(Error::MalformedSerialization(
                    "container kind changed while decoding".into(),
                ));
            }
        }
    }
    Ok(containers)
}

fn resolve(value: &EncodedValue, containers: &[Value]) -> Result<Value> {
    Ok(match value {
        EncodedValue::Null => Value::Null,
        EncodedValue::Bool(b) => Value::Bool(*b),
        EncodedValue::Int(i) => Value::Int(*i),
        EncodedValue::Float(f) => Value::Float(*f),
        EncodedValue::String(s) => Value::String(s.clone()),
        EncodedValue::Ref(index) => containers
            .get(*index)
            .cloned()
            .ok_or_else(|| {
                Error::MalformedSerialization(format!("dangling container index {index}"))
            })?,
    })
}

struct SpecDecoder<'d> {
    encoded: &'d [EncodedSpec],
    containers: &'d [Value],
    decoded: HashMap<usize, Arc<Spec>>,
    in_progress: HashSet<usize>,
}

impl<'d> SpecDecoder<'d> {
    fn new(encoded: &'d [EncodedSpec], containers: &'d [Value]) -> Self {
        Self {
            encoded,
            containers,
            decoded: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn decode_all(mut self) -> Result<Vec<Arc<Spec>>> {
        (0..self.encoded.len()).map(|i| self.decode(i)).collect()
    }

    fn decode(&mut self, index: usize) -> Result<Arc<Spec>> {
        if let Some(spec) = self.decoded.get(&index) {
            return Ok(Arc::clone(spec));
        }
        let all = self.encoded;
        let encoded = all
            .get(index)
            .ok_or_else(|| Error::MalformedSerialization(format!("dangling spec index {index}")))?;
        if !self.in_progress.insert(index) {
            return Err(Error::MalformedSerialization(format!("cyclic spec at index {index}")));
        }

        let shape = match &encoded.shape {
            EncodedSpecShape::Leaf => SpecShape::Leaf,
            EncodedSpecShape::Fields(fields) => SpecShape::Fields(
                fields
                    .iter()
                    .map(|(k, s)| Ok((k.clone(), self.decode(*s)?)))
                    .collect::<Result<_>>()?,
            ),
            EncodedSpecShape::Items(items) => SpecShape::Items(self.decode(*items)?),
        };
        let terms = encoded
            .terms
            .iter()
            .map(|(k, v)| Ok((k.clone(), Term::Value(resolve(v, self.containers)?))))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let spec = Arc::new(Spec::leaf().with_shape(shape).with_terms(terms));
        self.in_progress.remove(&index);
        self.decoded.insert(index, Arc::clone(&spec));
        Ok(spec)
    }
}

// ============================================================================
// Graph shortcuts
// ============================================================================

impl MetaGraph {
    /// Encode the tree containing `id` with the default state predicate.
    pub fn encode(&self, id: MetaId) -> Result<String> {
        encode(self, id, None)
    }

    /// Decode a document into this graph; see [`decode`].
    pub fn decode(&mut self, text: &str, spec: Option<Arc<Spec>>) -> Result<MetaId> {
        decode(self, text, spec)
    }
}
