//! Commit synchronizer.
//!
//! Folds node-local values of a subtree back into the canonical data tree.
//! A branch whose descendants are all null stays null; as soon as one leaf
//! carries a value, the containers above it are materialized up to the first
//! ancestor that already holds one.

use std::sync::Arc;

use crate::model::*;
use crate::Result;

use super::MetaGraph;

impl MetaGraph {
    /// Commit the subtree rooted at `id`. Idempotent.
    pub fn commit(&mut self, id: MetaId) -> Result<()> {
        tracing::debug!(%id, "committing meta subtree");
        self.commit_node(id)
    }

    fn commit_node(&mut self, id: MetaId) -> Result<()> {
        let node = self.node(id)?;
        match &node.shape {
            Shape::Sequence(items) => {
                let items = items.clone();
                let (array, created) = match &node.value {
                    Value::Array(array) => (array.clone(), false),
                    _ => (ArrayRef::new(), true),
                };
                if created {
                    self.link_value(id, Value::Array(array.clone()))?;
                }

                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    self.commit_node(item)?;
                    values.push(self.value(item)?);
                }
                array.replace(values);

                // A sequence without an array of its own has no items yet.
                if created && self.config().attach_empty_sequences {
                    self.attach(id)?;
                }
            }
            Shape::Fields(_) => {
                let spec = Arc::clone(&node.spec);
                for key in spec.field_keys() {
                    if let Some(child) = self.node(id)?.child(key) {
                        self.commit_node(child)?;
                    }
                }
            }
        }

        if self.node(id)?.value.is_primitive() {
            self.propagate(id)?;
        }
        Ok(())
    }

    /// Write the node's value into its parent's container, materializing
    /// the container (and, recursively, its ancestors) when absent.
    fn propagate(&mut self, id: MetaId) -> Result<()> {
        let node = self.node(id)?;
        let value = node.value.clone();

        if let Some(pos) = node.position {
            if let Value::Array(array) = &self.node(pos.sequence)?.value {
                array.set(pos.index, value);
            }
            return Ok(());
        }

        let (Some(parent), Some(key)) = (node.parent, node.key.clone()) else {
            return Ok(());
        };

        let container = match &self.node(parent)?.value {
            Value::Object(container) => container.clone(),
            _ => {
                let container = ObjectRef::new();
                self.link_value(parent, Value::Object(container.clone()))?;
                tracing::trace!(%parent, "materialized container");
                container
            }
        };
        container.insert(key, value);

        if !self.held_by_parent(parent)? {
            self.propagate(parent)?;
        }
        Ok(())
    }

    /// Whether the node's parent container (or sequence array) already holds
    /// exactly this node's value. Roots count as held.
    fn held_by_parent(&self, id: MetaId) -> Result<bool> {
        let node = self.node(id)?;
        if let Some(pos) = node.position {
            let sequence = self.node(pos.sequence)?;
            return Ok(sequence
                .value
                .as_array()
                .is_some_and(|array| array.get(pos.index).same(&node.value)));
        }
        match (node.parent, node.key.as_deref()) {
            (Some(parent), Some(key)) => Ok(self.node(parent)?.value.field(key).same(&node.value)),
            _ => Ok(true),
        }
    }
}
