//! # Meta Graph
//!
//! `MetaGraph` is an arena of `MetaNode`s mirroring a data value
//! node-for-node. Each node carries its specification, parent/key context,
//! extension state and a handle to the data value it represents.
//!
//! ## Backlinks
//!
//! Any object or array that has passed through the builder can be mapped
//! back to its node with [`MetaGraph::meta_of`]. The association lives in an
//! identity-keyed side map (`ValueKey -> holders`); the node keeps the
//! container alive, the map never owns anything.
//!
//! A container shared by several nodes resolves to the holder linked most
//! recently. When that node lets go of it, the lookup falls back to the
//! previous holder that still has it.
//!
//! ## Operations
//!
//! | Operation | Module | Description |
//! |-----------|--------|-------------|
//! | `build` / `metafy` | `builder` | Construct a node tree from spec + value |
//! | `rebase` / `set_value` | `builder` | Rebuild a subtree in place, keeping state |
//! | `apply_spec` | `builder` | Swap specifications, re-running setup hooks |
//! | `commit` | `commit` | Fold node-local values back into canonical data |
//! | `encode` / `decode` | `crate::codec` | Text round-trip of a whole tree |

mod builder;
mod commit;

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::config::GraphConfig;
use crate::model::*;
use crate::setup::SetupRegistry;
use crate::{Error, Result};

/// Name used for the root segment of a path.
pub const ROOT_PATH_NAME: &str = "Meta";

/// Nodes saved before a fallible operation, see [`MetaGraph::rollback`].
pub(crate) struct Checkpoint {
    next_id: u64,
    saved: HashMap<MetaId, MetaNode>,
}

/// The meta graph arena.
pub struct MetaGraph {
    nodes: HashMap<MetaId, MetaNode>,
    /// Container identity → nodes holding it, most recent last (non-owning).
    backlinks: HashMap<ValueKey, SmallVec<[MetaId; 1]>>,
    setups: Arc<SetupRegistry>,
    config: GraphConfig,
    next_id: u64,
}

impl MetaGraph {
    pub fn new(setups: Arc<SetupRegistry>) -> Self {
        Self::with_config(setups, GraphConfig::default())
    }

    pub fn with_config(setups: Arc<SetupRegistry>, config: GraphConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            backlinks: HashMap::new(),
            setups,
            config,
            next_id: 1,
        }
    }

    /// A graph with no setup hooks.
    pub fn bare() -> Self {
        Self::new(Arc::new(SetupRegistry::new()))
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn setups(&self) -> &Arc<SetupRegistry> {
        &self.setups
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: MetaId) -> bool {
        self.nodes.contains_key(&id)
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    pub fn node(&self, id: MetaId) -> Result<&MetaNode> {
        self.nodes.get(&id).ok_or_else(|| Error::NotFound(format!("Meta node {id}")))
    }

    pub(crate) fn node_mut(&mut self, id: MetaId) -> Result<&mut MetaNode> {
        self.nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Meta node {id}")))
    }

    pub fn spec(&self, id: MetaId) -> Result<&Arc<Spec>> {
        Ok(&self.node(id)?.spec)
    }

    /// Current data value of the node (containers are shared handles).
    pub fn value(&self, id: MetaId) -> Result<Value> {
        Ok(self.node(id)?.value.clone())
    }

    pub fn parent(&self, id: MetaId) -> Result<Option<MetaId>> {
        Ok(self.node(id)?.parent)
    }

    pub fn key(&self, id: MetaId) -> Result<Option<&str>> {
        Ok(self.node(id)?.key.as_deref())
    }

    pub fn position(&self, id: MetaId) -> Result<Option<Position>> {
        Ok(self.node(id)?.position)
    }

    pub fn state(&self, id: MetaId) -> Result<&State> {
        Ok(&self.node(id)?.state)
    }

    pub fn state_mut(&mut self, id: MetaId) -> Result<&mut State> {
        Ok(&mut self.node_mut(id)?.state)
    }

    /// Child node at a structural field.
    pub fn child(&self, id: MetaId, key: &str) -> Result<MetaId> {
        self.node(id)?
            .child(key)
            .ok_or_else(|| Error::NotFound(format!("Field '{key}' of meta node {id}")))
    }

    /// Item nodes of a sequence node (empty for anything else).
    pub fn items(&self, id: MetaId) -> Result<&[MetaId]> {
        Ok(self.node(id)?.items())
    }

    /// Value of a calculated field, as of the last build/rebase/recalc.
    pub fn calc(&self, id: MetaId, name: &str) -> Result<Option<&Value>> {
        Ok(self.node(id)?.calcs.get(name))
    }

    /// Resolve a specification term for this node: constants are returned
    /// as-is, function terms are evaluated against the node.
    pub fn term_value(&self, id: MetaId, name: &str) -> Result<Option<Value>> {
        let spec = Arc::clone(self.spec(id)?);
        Ok(match spec.get_term(name) {
            Some(Term::Value(v)) => Some(v.clone()),
            Some(Term::Fn(f)) => Some(f(self, id)),
            None => None,
        })
    }

    // ========================================================================
    // Value-to-node lookup
    // ========================================================================

    /// The node previously attached to an object or array value.
    ///
    /// Fails with `InvalidOperand` for scalars, `NotFound` for containers
    /// that were never built into this graph.
    pub fn meta_of(&self, value: &Value) -> Result<MetaId> {
        let key = value.container_key().ok_or_else(|| {
            Error::InvalidOperand(format!(
                "Attempt to obtain meta from primitive value: {value:?}"
            ))
        })?;
        self.backlinks
            .get(&key)
            .and_then(|holders| holders.last().copied())
            .ok_or_else(|| Error::NotFound(format!("No meta node attached to {value:?}")))
    }

    /// Parent's data value, for nodes built from an object or array.
    pub fn parent_value(&self, value: &Value) -> Result<Option<Value>> {
        let id = self.meta_of(value)?;
        match self.parent(id)? {
            Some(parent) => Ok(Some(self.value(parent)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Paths
    // ========================================================================

    /// Topmost ancestor of the node.
    pub fn root_of(&self, id: MetaId) -> Result<MetaId> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// The node and all its descendants, parents before children. Fields
    /// follow specification order, items follow sequence order.
    pub fn subtree(&self, id: MetaId) -> Result<Vec<MetaId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current)?;
            out.push(current);
            let mut children: Vec<MetaId> = match &node.shape {
                Shape::Sequence(items) => items.clone(),
                Shape::Fields(_) => node
                    .spec
                    .field_keys()
                    .into_iter()
                    .filter_map(|key| node.child(key))
                    .collect(),
            };
            children.reverse();
            stack.extend(children);
        }
        Ok(out)
    }

    /// Dotted key path from the root, e.g. `Meta.address.lines[2]`.
    pub fn path(&self, id: MetaId) -> Result<String> {
        self.path_with_root(id, ROOT_PATH_NAME)
    }

    pub fn path_with_root(&self, id: MetaId, root: &str) -> Result<String> {
        let mut segments: SmallVec<[String; 8]> = SmallVec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self.node(cur)?;
            let mut segment = node.key.clone().unwrap_or_else(|| root.to_string());
            if let Some(pos) = node.position {
                segment.push_str(&format!("[{}]", pos.index));
            }
            segments.push(segment);
            current = node.parent;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    /// String form of a node: scalars render their value, containers their
    /// path, absent values an empty string.
    pub fn display(&self, id: MetaId) -> Result<String> {
        let node = self.node(id)?;
        Ok(match &node.value {
            Value::Null => String::new(),
            Value::Object(_) | Value::Array(_) => self.path(id)?,
            other => other.to_string(),
        })
    }

    // ========================================================================
    // Calculated fields
    // ========================================================================

    /// Recompute the calculated fields of a whole subtree.
    pub fn recalc(&mut self, id: MetaId) -> Result<()> {
        for child in self.node(id)?.shape.child_ids() {
            self.recalc(child)?;
        }
        self.compute_calcs(id)
    }

    pub(crate) fn compute_calcs(&mut self, id: MetaId) -> Result<()> {
        let spec = Arc::clone(self.spec(id)?);
        if spec.calcs().is_empty() {
            return Ok(());
        }
        let calcs: BTreeMap<String, Value> = spec
            .calcs()
            .iter()
            .map(|(name, f)| (name.clone(), f(self, id)))
            .collect();
        self.node_mut(id)?.calcs = calcs;
        Ok(())
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Remove a subtree from the graph.
    ///
    /// Field data is left untouched. Removing an item also removes its
    /// element from the sequence's array, so item count and array length
    /// stay equal.
    pub fn remove(&mut self, id: MetaId) -> Result<()> {
        let node = self.node(id)?;
        let (parent, key, position) = (node.parent, node.key.clone(), node.position);

        if let Some(pos) = position {
            let seq = self.node_mut(pos.sequence)?;
            if let Shape::Sequence(items) = &mut seq.shape {
                items.retain(|item| *item != id);
            }
            if let Value::Array(array) = &seq.value {
                array.remove(pos.index);
            }
            self.reindex(pos.sequence)?;
        } else if let (Some(parent), Some(key)) = (parent, key) {
            if let Ok(parent) = self.node_mut(parent) {
                if let Shape::Fields(fields) = &mut parent.shape {
                    if fields.get(&key) == Some(&id) {
                        fields.remove(&key);
                    }
                }
            }
        }

        self.drop_subtree(id);
        tracing::debug!(%id, "removed meta subtree");
        Ok(())
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    pub(crate) fn alloc(&mut self, spec: Arc<Spec>) -> MetaId {
        let id = MetaId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, MetaNode::new(id, spec));
        id
    }

    /// Point the node at `value`, keeping the backlink map consistent.
    pub(crate) fn link_value(&mut self, id: MetaId, value: Value) -> Result<()> {
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.value, value.clone());
        if let Some(old_key) = old.container_key() {
            if Some(old_key) != value.container_key() {
                self.release_backlink(old_key, id);
            }
        }
        if let Some(key) = value.container_key() {
            let holders = self.backlinks.entry(key).or_default();
            holders.retain(|holder| *holder != id);
            holders.push(id);
        }
        Ok(())
    }

    fn release_backlink(&mut self, key: ValueKey, id: MetaId) {
        if let Some(holders) = self.backlinks.get_mut(&key) {
            holders.retain(|holder| *holder != id);
            if holders.is_empty() {
                self.backlinks.remove(&key);
            }
        }
    }

    pub(crate) fn drop_subtree(&mut self, id: MetaId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(key) = node.value.container_key() {
            self.release_backlink(key, id);
        }
        for child in node.shape.child_ids() {
            self.drop_subtree(child);
        }
    }

    /// Snapshot of the nodes an operation may touch: every listed subtree in
    /// full plus the listed single nodes.
    pub(crate) fn checkpoint(&self, subtrees: &[MetaId], singles: &[MetaId]) -> Checkpoint {
        let mut saved: HashMap<MetaId, MetaNode> = HashMap::new();
        let mut stack: Vec<MetaId> = subtrees.to_vec();
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if saved.insert(id, node.clone()).is_none() {
                stack.extend(node.shape.child_ids());
            }
        }
        for id in singles {
            if let Some(node) = self.nodes.get(id) {
                saved.entry(*id).or_insert_with(|| node.clone());
            }
        }
        Checkpoint { next_id: self.next_id, saved }
    }

    /// Undo a failed operation: nodes allocated since the checkpoint are
    /// dropped and the saved nodes come back with their backlinks. Writes
    /// already made into data containers are not reverted.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint { next_id, saved } = checkpoint;
        let fresh = |id: &MetaId| id.0 >= next_id;

        self.nodes.retain(|id, _| !fresh(id) && !saved.contains_key(id));
        self.backlinks.retain(|_, holders| {
            holders.retain(|holder| !fresh(holder) && !saved.contains_key(holder));
            !holders.is_empty()
        });
        let restored = saved.len();
        for (id, node) in saved {
            if let Some(key) = node.value.container_key() {
                self.backlinks.entry(key).or_default().push(id);
            }
            self.nodes.insert(id, node);
        }
        tracing::debug!(restored, "rolled back failed graph operation");
    }

    /// Rewrite item positions after the item list of a sequence changed.
    pub(crate) fn reindex(&mut self, sequence: MetaId) -> Result<()> {
        let items = self.node(sequence)?.items().to_vec();
        for (index, item) in items.into_iter().enumerate() {
            self.node_mut(item)?.position = Some(Position { sequence, index });
        }
        Ok(())
    }

    /// Run every registered hook against a new node, merging state as we go.
    pub(crate) fn run_setups(&mut self, id: MetaId) -> Result<()> {
        let setups = Arc::clone(&self.setups);
        for (name, hook) in setups.hooks() {
            if let Some(partial) = hook(self, id) {
                let entries = partial.len();
                tracing::trace!(%id, hook = name, entries, "setup hook contributed state");
                self.node_mut(id)?.state.merge(partial);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetaGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaGraph")
            .field("nodes", &self.nodes.len())
            .field("backlinks", &self.backlinks.len())
            .field("setups", &self.setups)
            .finish()
    }
}
