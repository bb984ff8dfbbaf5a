//! # Setup Hook Registry
//!
//! Extensions attach behaviour to every newly constructed meta node by
//! registering setup hooks. A hook receives the graph and the new node and
//! may return partial state, which is merged into the node's state before
//! the next hook runs. Registration order is therefore part of the contract:
//! a later hook observes everything earlier hooks contributed.
//!
//! The registry is assembled once at startup and handed to
//! `MetaGraph::new` inside an `Arc`; the graph only ever reads it.
//!
//! ```rust
//! use std::sync::Arc;
//! use metagraph::{MetaGraph, SetupRegistry, Spec, State, Value};
//!
//! let mut registry = SetupRegistry::new();
//! registry.register(|graph, id| {
//!     let spec = graph.spec(id).ok()?;
//!     spec.has_term("label").then(|| State::new().with("labelled", true))
//! });
//!
//! let mut graph = MetaGraph::new(Arc::new(registry));
//! let root = graph.metafy(Spec::leaf().term("label", "Name"), Value::from("Ada")).unwrap();
//! assert_eq!(graph.state(root).unwrap().get_bool("labelled"), Some(true));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::graph::MetaGraph;
use crate::model::{MetaId, State};

/// Initializer invoked once per newly constructed node.
pub type SetupHook = Arc<dyn Fn(&MetaGraph, MetaId) -> Option<State> + Send + Sync>;

/// A cooperative extension owning a set of specification terms.
///
/// The registry only invokes `setup` for nodes whose spec carries at least
/// one of `terms()`. An extension with no terms sees every node.
pub trait Extension: Send + Sync {
    fn name(&self) -> &'static str;

    /// Specification terms this extension owns.
    fn terms(&self) -> &'static [&'static str] {
        &[]
    }

    fn setup(&self, graph: &MetaGraph, id: MetaId) -> Option<State>;
}

/// Ordered list of setup hooks.
#[derive(Clone, Default)]
pub struct SetupRegistry {
    hooks: Vec<(String, SetupHook)>,
}

impl SetupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an anonymous hook.
    pub fn register<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&MetaGraph, MetaId) -> Option<State> + Send + Sync + 'static,
    {
        let name = format!("hook#{}", self.hooks.len());
        self.register_named(name, hook)
    }

    /// Append a hook under a name (shown in logs).
    pub fn register_named<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&MetaGraph, MetaId) -> Option<State> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(hook = %name, position = self.hooks.len(), "registering setup hook");
        self.hooks.push((name, Arc::new(hook)));
        self
    }

    /// Append an extension, gated on the presence of its terms.
    pub fn register_extension<E>(&mut self, extension: E) -> &mut Self
    where
        E: Extension + 'static,
    {
        let extension = Arc::new(extension);
        let name = extension.name();
        self.register_named(name, move |graph, id| {
            let terms = extension.terms();
            if !terms.is_empty() {
                let spec = graph.spec(id).ok()?;
                if !terms.iter().any(|t| spec.has_term(t)) {
                    return None;
                }
            }
            extension.setup(graph, id)
        })
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn hooks(&self) -> impl Iterator<Item = (&str, &SetupHook)> {
        self.hooks.iter().map(|(name, hook)| (name.as_str(), hook))
    }
}

impl fmt::Debug for SetupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupRegistry")
            .field("hooks", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Spec, Value};

    struct Flagger;

    impl Extension for Flagger {
        fn name(&self) -> &'static str { "flagger" }
        fn terms(&self) -> &'static [&'static str] { &["flag"] }
        fn setup(&self, _graph: &MetaGraph, _id: MetaId) -> Option<State> {
            Some(State::new().with("flagged", true))
        }
    }

    #[test]
    fn test_names_follow_registration_order() {
        let mut registry = SetupRegistry::new();
        registry.register(|_, _| None);
        registry.register_named("second", |_, _| None);
        registry.register_extension(Flagger);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["hook#0", "second", "flagger"]);
    }

    #[test]
    fn test_extension_only_runs_when_its_terms_are_present() {
        let mut registry = SetupRegistry::new();
        registry.register_extension(Flagger);
        let mut graph = MetaGraph::new(Arc::new(registry));

        let spec = Spec::object()
            .field("with", Spec::leaf().term("flag", true))
            .field("without", Spec::leaf());
        let root = graph.metafy(spec, Value::Null).unwrap();

        let with = graph.child(root, "with").unwrap();
        let without = graph.child(root, "without").unwrap();
        assert_eq!(graph.state(with).unwrap().get_bool("flagged"), Some(true));
        assert!(graph.state(without).unwrap().is_empty());
    }
}
