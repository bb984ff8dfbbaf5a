//! Validation: validator functions plus mandatory / disabled / hidden flags.
//!
//! A validator returns `true` (valid), `false` (error without a message) or
//! a message string (error). The outcome lands in the node's state as
//! `error`: `false` when valid, `true` or the message otherwise. This allows
//! validators of the form `condition || "message"`.

use crate::graph::MetaGraph;
use crate::model::{MetaId, State, Term, Value};
use crate::setup::Extension;
use crate::Result;

// Specification terms.
pub const VALIDATOR: &str = "validator";
pub const MANDATORY: &str = "mandatory";
pub const DISABLED: &str = "disabled";
pub const HIDDEN: &str = "hidden";

// State entries.
pub const VALIDATED: &str = "validated";
pub const ERROR: &str = "error";
pub const ALL_ERRORS: &str = "allErrors";

const FLAGS: [&str; 3] = [MANDATORY, DISABLED, HIDDEN];

/// Initialises validation state for nodes carrying validation terms.
///
/// Error state starts out `false` rather than reflecting the current value,
/// so untouched fields are not reported before the user visits them.
/// Function-valued flags are evaluated once here against the data the node
/// was built on; [`refresh_flags`] re-evaluates them after edits.
pub struct Validation;

impl Extension for Validation {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn terms(&self) -> &'static [&'static str] {
        &[VALIDATOR, MANDATORY, DISABLED, HIDDEN]
    }

    fn setup(&self, graph: &MetaGraph, id: MetaId) -> Option<State> {
        let spec = graph.spec(id).ok()?;
        let mut state = State::new();
        if spec.has_term(VALIDATOR) {
            state.set(ERROR, false);
            state.set(VALIDATED, false);
        }
        for flag in FLAGS {
            let value = match spec.get_term(flag) {
                Some(Term::Value(Value::Bool(b))) => *b,
                Some(Term::Fn(f)) => f(graph, id).is_truthy(),
                _ => continue,
            };
            state.set(flag, value);
        }
        Some(state)
    }
}

/// Re-evaluate every function-valued flag in the subtree.
pub fn refresh_flags(graph: &mut MetaGraph, id: MetaId) -> Result<()> {
    let mut updates = Vec::new();
    for node in graph.subtree(id)? {
        let spec = graph.spec(node)?;
        for flag in FLAGS {
            if let Some(Term::Fn(f)) = spec.get_term(flag) {
                updates.push((node, flag, f(&*graph, node).is_truthy()));
            }
        }
    }
    for (node, flag, value) in updates {
        graph.state_mut(node)?.set(flag, value);
    }
    Ok(())
}

/// Run the validator of a single node (not recursive) and refresh the
/// dynamic flags of the whole tree.
pub fn validate(graph: &mut MetaGraph, id: MetaId) -> Result<()> {
    validate_node(graph, id)?;
    let root = graph.root_of(id)?;
    refresh_flags(graph, root)
}

/// Validate a subtree, returning the nodes left in an error state.
///
/// With `revalidate`, only nodes that were validated before are re-run.
/// The result is also stored in the node's `allErrors` state as node ids.
pub fn validate_all(graph: &mut MetaGraph, id: MetaId, revalidate: bool) -> Result<Vec<MetaId>> {
    let errors = collect_errors(graph, id, revalidate)?;
    let root = graph.root_of(id)?;
    refresh_flags(graph, root)?;
    Ok(errors)
}

/// Whether the node currently reports an error.
pub fn has_error(graph: &MetaGraph, id: MetaId) -> Result<bool> {
    Ok(graph.state(id)?.get(ERROR).is_some_and(Value::is_truthy))
}

fn collect_errors(graph: &mut MetaGraph, id: MetaId, revalidate: bool) -> Result<Vec<MetaId>> {
    let mut errors = Vec::new();
    if !revalidate || graph.state(id)?.get_bool(VALIDATED) == Some(true) {
        validate_node(graph, id)?;
    }
    if has_error(graph, id)? {
        errors.push(id);
    }

    let node = graph.node(id)?;
    let children: Vec<MetaId> = if node.is_sequence() {
        node.items().to_vec()
    } else {
        node.spec()
            .field_keys()
            .into_iter()
            .filter_map(|key| node.child(key))
            .collect()
    };
    for child in children {
        errors.extend(collect_errors(graph, child, revalidate)?);
    }

    let ids = errors.iter().map(|e| Value::Int(e.0 as i64)).collect::<Vec<_>>();
    graph.state_mut(id)?.set(ALL_ERRORS, ids);
    Ok(errors)
}

fn validate_node(graph: &mut MetaGraph, id: MetaId) -> Result<()> {
    let outcome = match graph.spec(id)?.get_term(VALIDATOR) {
        Some(Term::Fn(validator)) => Some(match validator(&*graph, id) {
            Value::Bool(false) => Value::Bool(true),
            Value::String(message) => Value::String(message),
            _ => Value::Bool(false),
        }),
        _ => None,
    };
    let state = graph.state_mut(id)?;
    state.set(VALIDATED, true);
    if let Some(error) = outcome {
        state.set(ERROR, error);
    }
    tracing::trace!(%id, "validated meta node");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::Spec;
    use crate::setup::SetupRegistry;
    use serde_json::json;

    fn registry() -> Arc<SetupRegistry> {
        let mut registry = SetupRegistry::new();
        registry.register_extension(Validation);
        Arc::new(registry)
    }

    fn required(graph: &MetaGraph, id: MetaId) -> Value {
        match graph.value(id) {
            Ok(Value::String(s)) if !s.is_empty() => Value::Bool(true),
            _ => Value::from("Required"),
        }
    }

    fn form_spec() -> Spec {
        Spec::object()
            .field("name", Spec::leaf().term_fn(VALIDATOR, required).term(MANDATORY, true))
            .field("email", Spec::leaf().term_fn(VALIDATOR, |g, id| {
                let at = g.value(id).ok().and_then(|v| v.as_str().map(|s| s.contains('@')));
                Value::Bool(at.unwrap_or(false))
            }))
            .field("nickname", Spec::leaf().term_fn(HIDDEN, |g, id| {
                let parent = g.parent(id).ok().flatten();
                let name = parent.and_then(|p| g.value(p).ok()).map(|v| v.field("name"));
                Value::Bool(name.is_none_or(|n| n.is_null()))
            }))
    }

    #[test]
    fn test_setup_initialises_state() {
        let mut graph = MetaGraph::new(registry());
        let root = graph.metafy(form_spec(), Value::Null).unwrap();
        let name = graph.child(root, "name").unwrap();
        let state = graph.state(name).unwrap();
        assert_eq!(state.get_bool(ERROR), Some(false));
        assert_eq!(state.get_bool(VALIDATED), Some(false));
        assert_eq!(state.get_bool(MANDATORY), Some(true));
        assert!(graph.state(root).unwrap().is_empty());
    }

    #[test]
    fn test_validate_single_node() {
        let mut graph = MetaGraph::new(registry());
        let root = graph.metafy(form_spec(), Value::from_json(json!({"email": "nope"}))).unwrap();
        let name = graph.child(root, "name").unwrap();
        let email = graph.child(root, "email").unwrap();

        validate(&mut graph, name).unwrap();
        assert_eq!(graph.state(name).unwrap().get(ERROR), Some(&Value::from("Required")));

        validate(&mut graph, email).unwrap();
        assert_eq!(graph.state(email).unwrap().get_bool(ERROR), Some(true));

        graph.set_value(email, "a@b.c").unwrap();
        validate(&mut graph, email).unwrap();
        assert_eq!(graph.state(email).unwrap().get_bool(ERROR), Some(false));
    }

    #[test]
    fn test_validate_all_collects_errors() {
        let mut graph = MetaGraph::new(registry());
        let root = graph
            .metafy(form_spec(), Value::from_json(json!({"name": "", "email": "x@y"})))
            .unwrap();
        let name = graph.child(root, "name").unwrap();

        let errors = validate_all(&mut graph, root, false).unwrap();
        assert_eq!(errors, vec![name]);
        assert_eq!(
            graph.state(root).unwrap().get(ALL_ERRORS),
            Some(&Value::from(vec![Value::Int(name.0 as i64)]))
        );
    }

    #[test]
    fn test_revalidate_skips_unvisited_nodes() {
        let mut graph = MetaGraph::new(registry());
        let root = graph.metafy(form_spec(), Value::Null).unwrap();
        assert!(validate_all(&mut graph, root, true).unwrap().is_empty());

        let name = graph.child(root, "name").unwrap();
        validate(&mut graph, name).unwrap();
        assert_eq!(validate_all(&mut graph, root, true).unwrap(), vec![name]);
    }

    #[test]
    fn test_dynamic_flags_follow_data() {
        let mut graph = MetaGraph::new(registry());
        let root = graph.metafy(form_spec(), Value::from_json(json!({}))).unwrap();
        let name = graph.child(root, "name").unwrap();
        let nickname = graph.child(root, "nickname").unwrap();

        refresh_flags(&mut graph, root).unwrap();
        assert_eq!(graph.state(nickname).unwrap().get_bool(HIDDEN), Some(true));

        graph.set_value(name, "Ada").unwrap();
        validate(&mut graph, name).unwrap();
        assert_eq!(graph.state(nickname).unwrap().get_bool(HIDDEN), Some(false));
    }

    #[test]
    fn test_dynamic_flags_are_set_on_construction() {
        let mut graph = MetaGraph::new(registry());
        let root = graph.metafy(form_spec(), Value::from_json(json!({}))).unwrap();
        let nickname = graph.child(root, "nickname").unwrap();
        assert_eq!(graph.state(nickname).unwrap().get_bool(HIDDEN), Some(true));

        let root = graph.metafy(form_spec(), Value::from_json(json!({"name": "Ada"}))).unwrap();
        let nickname = graph.child(root, "nickname").unwrap();
        assert_eq!(graph.state(nickname).unwrap().get_bool(HIDDEN), Some(false));
    }
}
