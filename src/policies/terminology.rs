//! Terminology: labels, help text and symbols for nodes.

use crate::graph::MetaGraph;
use crate::model::{MetaId, State, Value};
use crate::setup::Extension;
use crate::Result;

/// Primary identifying label.
pub const LABEL: &str = "label";
/// Additional descriptive text.
pub const HELP_TEXT: &str = "helpText";
/// Symbolic indicator, such as an icon class.
pub const SYMBOL: &str = "symbol";

/// Terminology carries no state; registering it only documents ownership
/// of its terms.
pub struct Terminology;

impl Extension for Terminology {
    fn name(&self) -> &'static str {
        "terminology"
    }

    fn terms(&self) -> &'static [&'static str] {
        &[LABEL, HELP_TEXT, SYMBOL]
    }

    fn setup(&self, _graph: &MetaGraph, _id: MetaId) -> Option<State> {
        None
    }
}

fn text_term(graph: &MetaGraph, id: MetaId, term: &str) -> Result<Option<String>> {
    Ok(graph.term_value(id, term)?.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

pub fn label(graph: &MetaGraph, id: MetaId) -> Result<Option<String>> {
    text_term(graph, id, LABEL)
}

pub fn help_text(graph: &MetaGraph, id: MetaId) -> Result<Option<String>> {
    text_term(graph, id, HELP_TEXT)
}

pub fn symbol(graph: &MetaGraph, id: MetaId) -> Result<Option<String>> {
    text_term(graph, id, SYMBOL)
}

/// The node's label, else its key.
pub fn label_or_key(graph: &MetaGraph, id: MetaId) -> Result<Option<String>> {
    match label(graph, id)? {
        Some(label) => Ok(Some(label)),
        None => Ok(graph.key(id)?.map(str::to_string)),
    }
}

/// Labels from just below `from` down to `to`, joined with `" > "`.
pub fn label_path(graph: &MetaGraph, from: MetaId, to: MetaId) -> Result<String> {
    let mut labels = Vec::new();
    labels.extend(label_or_key(graph, to)?);
    let mut current = to;
    while let Some(parent) = graph.parent(current)? {
        if parent == from {
            break;
        }
        labels.extend(label_or_key(graph, parent)?);
        current = parent;
    }
    labels.reverse();
    Ok(labels.join(" > "))
}
