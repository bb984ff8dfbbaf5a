//! Graph builder: construction, rebase and specification swaps.
//!
//! A single recursive walk serves all three. With no template it allocates
//! fresh nodes and runs the setup hooks; with a template it rebuilds the
//! existing node in place, reusing child slots by field key (objects) or by
//! index (sequences) and dropping every slot the new shape no longer has.
//!
//! Each public entry point is all-or-nothing for the arena: on error every
//! node allocated by the call is discarded and the touched nodes are
//! restored from a checkpoint.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::model::*;
use crate::{Error, Result};

use super::MetaGraph;

/// Where a node hangs in the graph.
#[derive(Debug, Clone)]
struct Slot {
    parent: Option<MetaId>,
    key: Option<String>,
    position: Option<Position>,
}

impl MetaGraph {
    /// Build a root node from a specification and a data value.
    pub fn metafy(&mut self, spec: impl Into<Arc<Spec>>, value: Value) -> Result<MetaId> {
        self.build(spec, value, None, None, None)
    }

    /// Build (or, with a template, rebuild) a node.
    ///
    /// With `parent`/`key` the new node takes over the parent's slot at
    /// `key`, and the value is written into the parent's data container.
    /// Any different node previously in that slot is dropped.
    pub fn build(
        &mut self,
        spec: impl Into<Arc<Spec>>,
        value: Value,
        parent: Option<MetaId>,
        key: Option<&str>,
        template: Option<MetaId>,
    ) -> Result<MetaId> {
        let spec = spec.into();
        if parent.is_some() != key.is_some() {
            return Err(Error::InvalidOperand(
                "parent and key must be supplied together".into(),
            ));
        }
        let position = match template {
            Some(t) => self.node(t)?.position,
            None => None,
        };
        let depth = match parent {
            Some(p) => self.depth(p)? + 1,
            None => 0,
        };

        let mut subtrees: Vec<MetaId> = template.into_iter().collect();
        if let (Some(p), Some(k)) = (parent, key) {
            subtrees.extend(self.node(p)?.child(k));
        }
        let singles: Vec<MetaId> = parent.into_iter().collect();
        let checkpoint = self.checkpoint(&subtrees, &singles);

        let slot = Slot { parent, key: key.map(str::to_string), position };
        match self.build_node(spec, value, slot, template, depth) {
            Ok(id) => {
                let rebase = template.is_some();
                tracing::debug!(%id, rebase, nodes = self.len(), "built meta node");
                Ok(id)
            }
            Err(e) => {
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    /// Rebuild a node in place onto a new value, or onto its current value
    /// when `value` is `None`. State survives; setup hooks do not re-run.
    pub fn rebase(&mut self, id: MetaId, value: Option<Value>) -> Result<MetaId> {
        let spec = Arc::clone(self.spec(id)?);
        self.rebase_with_spec(id, spec, value)
    }

    /// Rebase under a different specification, reusing existing nodes.
    pub fn rebase_with_spec(
        &mut self,
        id: MetaId,
        spec: impl Into<Arc<Spec>>,
        value: Option<Value>,
    ) -> Result<MetaId> {
        let node = self.node(id)?;
        let value = value.unwrap_or_else(|| node.value.clone());
        let slot = Slot {
            parent: node.parent,
            key: node.key.clone(),
            position: node.position,
        };
        let depth = self.depth(id)?;
        let singles: Vec<MetaId> = slot.parent.into_iter().collect();
        let checkpoint = self.checkpoint(&[id], &singles);

        tracing::debug!(%id, "rebasing meta node");
        match self.build_node(spec.into(), value, slot, Some(id), depth) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.rollback(checkpoint);
                Err(e)
            }
        }
    }

    /// Replace the node's value. Scalars are written straight through to
    /// the parent's data container; containers rebuild the subtree.
    pub fn set_value(&mut self, id: MetaId, value: impl Into<Value>) -> Result<()> {
        self.rebase(id, Some(value.into()))?;
        Ok(())
    }

    /// Change a scalar node's value locally without touching the parent's
    /// container. `commit` folds staged values back into the data tree.
    pub fn stage_value(&mut self, id: MetaId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if value.is_container() {
            return Err(Error::InvalidOperand(format!(
                "Cannot stage container value {value:?}; use set_value"
            )));
        }
        let node = self.node(id)?;
        if node.is_sequence() || !node.spec.field_keys().is_empty() {
            return Err(Error::InvalidOperand(format!(
                "Cannot stage a scalar on structured meta node {id}"
            )));
        }
        self.link_value(id, value)
    }

    /// Swap in a new specification for a subtree, reusing existing nodes,
    /// then re-run the setup hooks on the reused nodes since terms may
    /// differ. Nodes the new specification adds already ran them when they
    /// were built.
    pub fn apply_spec(&mut self, id: MetaId, spec: impl Into<Arc<Spec>>) -> Result<()> {
        let reused: HashSet<MetaId> = self.subtree(id)?.into_iter().collect();
        self.rebase_with_spec(id, spec, None)?;
        self.setup_subtree(id, &reused)
    }

    fn setup_subtree(&mut self, id: MetaId, reused: &HashSet<MetaId>) -> Result<()> {
        for child in self.node(id)?.shape.child_ids() {
            self.setup_subtree(child, reused)?;
        }
        if reused.contains(&id) {
            self.run_setups(id)?;
        }
        Ok(())
    }

    fn depth(&self, id: MetaId) -> Result<usize> {
        let mut depth = 0;
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.node(parent)?.parent;
        }
        Ok(depth)
    }

    fn build_node(
        &mut self,
        spec: Arc<Spec>,
        value: Value,
        slot: Slot,
        template: Option<MetaId>,
        depth: usize,
    ) -> Result<MetaId> {
        if depth > self.config().max_depth {
            return Err(Error::DepthExceeded(depth));
        }

        let (id, fresh) = match template {
            Some(t) => {
                self.node(t)?;
                (t, false)
            }
            None => (self.alloc(Arc::clone(&spec)), true),
        };

        {
            let node = self.node_mut(id)?;
            node.spec = Arc::clone(&spec);
            node.parent = slot.parent;
            node.key = slot.key.clone();
            node.position = slot.position;
        }
        self.link_value(id, value.clone())?;
        self.attach(id)?;

        let old_shape = std::mem::take(&mut self.node_mut(id)?.shape);

        if spec.has_items() || value.is_array() {
            let item_spec = spec
                .item_spec()
                .cloned()
                .unwrap_or_else(|| Arc::new(Spec::leaf()));
            let old_items = match old_shape {
                Shape::Sequence(items) => items,
                Shape::Fields(fields) => {
                    if !fields.is_empty() {
                        tracing::warn!(
                            %id,
                            dropped = fields.len(),
                            "object node rebuilt as sequence"
                        );
                    }
                    fields.into_values().for_each(|child| self.drop_subtree(child));
                    Vec::new()
                }
            };

            self.node_mut(id)?.shape = Shape::Sequence(Vec::new());
            let item_values = value.items();
            let mut items = Vec::with_capacity(item_values.len());
            for (index, item_value) in item_values.into_iter().enumerate() {
                let item_slot = Slot {
                    parent: slot.parent,
                    key: slot.key.clone(),
                    position: Some(Position { sequence: id, index }),
                };
                let template = old_items.get(index).copied();
                let item_spec = Arc::clone(&item_spec);
                let item =
                    self.build_node(item_spec, item_value, item_slot, template, depth + 1)?;
                items.push(item);
            }
            for stale in old_items.into_iter().skip(items.len()) {
                self.drop_subtree(stale);
            }
            tracing::trace!(%id, items = items.len(), "sequence reconciled");
            self.node_mut(id)?.shape = Shape::Sequence(items);
        } else {
            let mut old_fields = match old_shape {
                Shape::Fields(fields) => fields,
                Shape::Sequence(items) => {
                    if !items.is_empty() {
                        tracing::warn!(
                            %id,
                            dropped = items.len(),
                            "sequence node rebuilt as object"
                        );
                    }
                    items.into_iter().for_each(|item| self.drop_subtree(item));
                    HashMap::new()
                }
            };

            self.node_mut(id)?.shape = Shape::Fields(HashMap::new());
            for key in spec.field_keys() {
                let Some(field_spec) = spec.field_spec(key).cloned() else {
                    continue;
                };
                let child_slot = Slot {
                    parent: Some(id),
                    key: Some(key.to_string()),
                    position: None,
                };
                let template = old_fields.remove(key);
                self.build_node(field_spec, value.field(key), child_slot, template, depth + 1)?;
            }
            for (_, stale) in old_fields {
                self.drop_subtree(stale);
            }
        }

        if fresh {
            self.run_setups(id)?;
        }
        self.compute_calcs(id)?;
        Ok(id)
    }

    /// Hook the node into its parent: structural slot plus data container.
    pub(super) fn attach(&mut self, id: MetaId) -> Result<()> {
        let node = self.node(id)?;
        let value = node.value.clone();

        if let Some(pos) = node.position {
            if let Ok(sequence) = self.node(pos.sequence) {
                if let Value::Array(array) = &sequence.value {
                    if !array.get(pos.index).same(&value) {
                        array.set(pos.index, value);
                    }
                }
            }
            return Ok(());
        }

        let (Some(parent), Some(key)) = (node.parent, node.key.clone()) else {
            return Ok(());
        };

        let parent_node = self.node_mut(parent)?;
        let replaced = match &mut parent_node.shape {
            Shape::Fields(fields) => fields.insert(key.clone(), id).filter(|prev| *prev != id),
            Shape::Sequence(_) => {
                tracing::warn!(%id, %parent, "cannot attach a field to a sequence node");
                None
            }
        };
        if let Value::Object(container) = &parent_node.value {
            let writable = !value.is_null() || container.contains_key(&key);
            if writable && !container.get(&key).same(&value) {
                container.insert(key, value);
            }
        }
        if let Some(previous) = replaced {
            self.drop_subtree(previous);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::State;
    use crate::setup::SetupRegistry;
    use serde_json::json;

    fn counting_registry() -> Arc<SetupRegistry> {
        let mut registry = SetupRegistry::new();
        registry.register(|_, _| Some(State::new().with("setup", 1)));
        Arc::new(registry)
    }

    #[test]
    fn test_build_object_links_children() {
        let mut graph = MetaGraph::bare();
        let spec = Spec::object()
            .field("a", Spec::leaf())
            .field("b", Spec::object().field("c", Spec::leaf()));
        let data = Value::from_json(json!({"a": 1, "b": {"c": 2}}));
        let root = graph.metafy(spec, data.clone()).unwrap();

        let a = graph.child(root, "a").unwrap();
        let b = graph.child(root, "b").unwrap();
        let c = graph.child(b, "c").unwrap();
        assert_eq!(graph.parent(a).unwrap(), Some(root));
        assert_eq!(graph.key(c).unwrap(), Some("c"));
        assert_eq!(graph.value(c).unwrap(), Value::Int(2));
        assert!(graph.value(b).unwrap().same(&data.field("b")));
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_fields_missing_from_spec_are_ignored() {
        let mut graph = MetaGraph::bare();
        let spec = Spec::object().field("a", Spec::leaf());
        let root = graph.metafy(spec, Value::from_json(json!({"a": 1, "extra": 2}))).unwrap();
        assert!(graph.child(root, "extra").is_err());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_items_share_sequence_context() {
        let mut graph = MetaGraph::bare();
        let spec = Spec::object().field("tags", Spec::list(Spec::leaf()));
        let root = graph.metafy(spec, Value::from_json(json!({"tags": ["x", "y"]}))).unwrap();
        let tags = graph.child(root, "tags").unwrap();
        let items = graph.items(tags).unwrap().to_vec();
        assert_eq!(items.len(), 2);
        for (index, item) in items.iter().enumerate() {
            assert_eq!(graph.parent(*item).unwrap(), Some(root));
            assert_eq!(graph.key(*item).unwrap(), Some("tags"));
            assert_eq!(graph.position(*item).unwrap(), Some(Position { sequence: tags, index }));
        }
        // Items never take over the parent's field slot.
        assert_eq!(graph.child(root, "tags").unwrap(), tags);
    }

    #[test]
    fn test_array_value_without_items_spec_is_a_sequence() {
        let mut graph = MetaGraph::bare();
        let root = graph.metafy(Spec::leaf(), Value::from_json(json!([1, 2, 3]))).unwrap();
        assert!(graph.node(root).unwrap().is_sequence());
        assert_eq!(graph.items(root).unwrap().len(), 3);
    }

    #[test]
    fn test_null_value_with_items_spec_is_an_empty_sequence() {
        let mut graph = MetaGraph::bare();
        let root = graph.metafy(Spec::list(Spec::leaf()), Value::Null).unwrap();
        assert!(graph.node(root).unwrap().is_sequence());
        assert!(graph.items(root).unwrap().is_empty());
    }

    #[test]
    fn test_hooks_run_once_per_new_node_only() {
        let mut graph = MetaGraph::new(counting_registry());
        let spec = Spec::object().field("a", Spec::leaf());
        let root = graph.metafy(spec, Value::from_json(json!({"a": 1}))).unwrap();
        let a = graph.child(root, "a").unwrap();
        graph.state_mut(a).unwrap().set("setup", 7);

        graph.rebase(root, Some(Value::from_json(json!({"a": 2})))).unwrap();
        assert_eq!(graph.state(a).unwrap().get("setup"), Some(&Value::Int(7)));
    }

    #[test]
    fn test_shape_change_replaces_children() {
        let mut graph = MetaGraph::bare();
        let spec = Spec::object().field("a", Spec::leaf());
        let root = graph.metafy(spec, Value::from_json(json!({"a": 1}))).unwrap();
        let a = graph.child(root, "a").unwrap();

        let list = Spec::list(Spec::leaf());
        graph.rebase_with_spec(root, list, Some(Value::from_json(json!([1, 2])))).unwrap();
        assert!(!graph.contains(a));
        assert_eq!(graph.items(root).unwrap().len(), 2);

        let object = Spec::object().field("b", Spec::leaf());
        graph.rebase_with_spec(root, object, Some(Value::from_json(json!({"b": 1})))).unwrap();
        assert!(!graph.node(root).unwrap().is_sequence());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_depth_guard() {
        let mut graph = MetaGraph::with_config(
            Arc::new(SetupRegistry::new()),
            crate::GraphConfig { max_depth: 1, ..Default::default() },
        );
        let spec = Spec::object().field("a", Spec::object().field("b", Spec::leaf()));
        let err = graph.metafy(spec, Value::Null).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded(2)));
    }

    #[test]
    fn test_build_into_parent_slot_replaces_previous_child() {
        let mut graph = MetaGraph::bare();
        let data = Value::from_json(json!({"a": 1}));
        let root = graph.metafy(Spec::object().field("a", Spec::leaf()), data.clone()).unwrap();
        let old = graph.child(root, "a").unwrap();

        let new = graph.build(Spec::leaf(), Value::from(9), Some(root), Some("a"), None).unwrap();
        assert_ne!(old, new);
        assert!(!graph.contains(old));
        assert_eq!(graph.child(root, "a").unwrap(), new);
        assert_eq!(data.field("a"), Value::Int(9));
    }

    #[test]
    fn test_parent_without_key_is_rejected() {
        let mut graph = MetaGraph::bare();
        let root = graph.metafy(Spec::object(), Value::Null).unwrap();
        let err = graph.build(Spec::leaf(), Value::Null, Some(root), None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidOperand(_)));
    }

    #[test]
    fn test_stage_value_rejects_containers() {
        let mut graph = MetaGraph::bare();
        let root = graph.metafy(Spec::object().field("a", Spec::leaf()), Value::Null).unwrap();
        let a = graph.child(root, "a").unwrap();
        assert!(graph.stage_value(a, Value::from_json(json!({}))).is_err());
        assert!(graph.stage_value(root, "x").is_err());
        graph.stage_value(a, "x").unwrap();
        assert_eq!(graph.value(a).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_calcs_recomputed_on_rebase() {
        let mut graph = MetaGraph::bare();
        let spec = Spec::object()
            .field("first", Spec::leaf())
            .field("last", Spec::leaf())
            .calc("full", |g, id| {
                let v = g.value(id).unwrap_or_default();
                Value::from(format!("{} {}", v.field("first"), v.field("last")))
            });
        let data = Value::from_json(json!({"first": "Ada", "last": "Lovelace"}));
        let root = graph.metafy(spec, data).unwrap();
        assert_eq!(graph.calc(root, "full").unwrap(), Some(&Value::from("Ada Lovelace")));

        let data = Value::from_json(json!({"first": "Grace", "last": "Hopper"}));
        graph.rebase(root, Some(data)).unwrap();
        assert_eq!(graph.calc(root, "full").unwrap(), Some(&Value::from("Grace Hopper")));
    }

    fn shallow_graph() -> MetaGraph {
        let config = crate::GraphConfig { max_depth: 1, ..Default::default() };
        MetaGraph::with_config(Arc::new(SetupRegistry::new()), config)
    }

    #[test]
    fn test_failed_build_leaves_no_nodes_behind() {
        let mut graph = shallow_graph();
        let spec = Spec::object().field("a", Spec::object().field("b", Spec::leaf()));
        let data = Value::from_json(json!({"a": {"b": 1}}));

        assert!(graph.metafy(spec, data.clone()).is_err());
        assert!(graph.is_empty());
        assert!(matches!(graph.meta_of(&data), Err(Error::NotFound(_))));
        assert!(matches!(graph.meta_of(&data.field("a")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_rebase_restores_previous_tree() {
        let mut graph = shallow_graph();
        let spec = Spec::object().field("z", Spec::leaf()).field("a", Spec::leaf());
        let data = Value::from_json(json!({"z": 1, "a": 2}));
        let root = graph.metafy(spec, data.clone()).unwrap();
        let z = graph.child(root, "z").unwrap();
        let a = graph.child(root, "a").unwrap();

        let deeper = Spec::object()
            .field("z", Spec::leaf())
            .field("a", Spec::object().field("b", Spec::leaf()));
        let err = graph.rebase_with_spec(root, deeper, None).unwrap_err();
        assert!(matches!(err, Error::DepthExceeded(2)));

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.child(root, "z").unwrap(), z);
        assert_eq!(graph.child(root, "a").unwrap(), a);
        assert!(graph.spec(a).unwrap().field_keys().is_empty());
        assert_eq!(graph.meta_of(&data).unwrap(), root);
    }

    #[test]
    fn test_failed_build_into_slot_keeps_previous_child() {
        let mut graph = shallow_graph();
        let root = graph.metafy(Spec::object().field("a", Spec::leaf()), Value::Null).unwrap();
        let a = graph.child(root, "a").unwrap();

        let nested = Spec::object().field("b", Spec::object().field("c", Spec::leaf()));
        assert!(graph.build(nested, Value::Null, Some(root), Some("a"), None).is_err());
        assert_eq!(graph.child(root, "a").unwrap(), a);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_apply_spec_runs_hooks_once_per_new_node() {
        use parking_lot::Mutex;

        let calls: Arc<Mutex<Vec<MetaId>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let mut registry = SetupRegistry::new();
        registry.register(move |_, id| {
            sink.lock().push(id);
            None
        });
        let mut graph = MetaGraph::new(Arc::new(registry));
        let root = graph.metafy(Spec::object().field("a", Spec::leaf()), Value::Null).unwrap();
        let a = graph.child(root, "a").unwrap();

        let wider = Spec::object().field("a", Spec::leaf()).field("b", Spec::leaf());
        graph.apply_spec(root, wider).unwrap();
        let b = graph.child(root, "b").unwrap();

        let calls = calls.lock().clone();
        let count = |id: MetaId| calls.iter().filter(|c| **c == id).count();
        assert_eq!(count(b), 1);
        assert_eq!(count(a), 2);
        assert_eq!(count(root), 2);
    }
}
