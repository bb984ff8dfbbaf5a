//! Specification tree: the declarative description of a data shape.
//!
//! A `Spec` says which structural fields (or which item template) a position
//! in the data has, plus an open set of named terms contributed by
//! extensions. The core only reads the shape; terms are opaque to it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::graph::MetaGraph;
use crate::model::{MetaId, Value};

/// Field names that never count as structural fields.
pub const RESERVED_FIELD_NAMES: &[&str] = &["__typename", "$"];

/// A function of a node: receives the graph and the node being evaluated.
pub type MetaFn = Arc<dyn Fn(&MetaGraph, MetaId) -> Value + Send + Sync>;

/// An extension term: either a constant or a function of the node.
#[derive(Clone)]
pub enum Term {
    Value(Value),
    Fn(MetaFn),
}

impl Term {
    pub fn is_fn(&self) -> bool {
        matches!(self, Term::Fn(_))
    }

    /// The constant, if this term is not a function.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Term::Value(v) => Some(v),
            Term::Fn(_) => None,
        }
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Value(v) => write!(f, "{v:?}"),
            Term::Fn(_) => write!(f, "<fn>"),
        }
    }
}

/// Structural shape of a specification node.
///
/// Object shape and collection shape are mutually exclusive.
#[derive(Clone, Default)]
pub enum SpecShape {
    /// No structural children (scalars, or objects treated opaquely).
    #[default]
    Leaf,
    /// Named sub-specifications, in declaration order.
    Fields(Vec<(String, Arc<Spec>)>),
    /// Template applied to every item of a homogeneous collection.
    Items(Arc<Spec>),
}

/// Specification node.
#[derive(Clone, Default)]
pub struct Spec {
    shape: SpecShape,
    terms: BTreeMap<String, Term>,
    calcs: Vec<(String, MetaFn)>,
}

impl Spec {
    /// A spec with no structure and no terms.
    pub fn leaf() -> Self {
        Self::default()
    }

    /// An object spec with no fields yet.
    pub fn object() -> Self {
        Self { shape: SpecShape::Fields(Vec::new()), ..Self::default() }
    }

    /// A collection spec with the given item template.
    pub fn list(items: impl Into<Arc<Spec>>) -> Self {
        Self { shape: SpecShape::Items(items.into()), ..Self::default() }
    }

    /// Add (or replace) a structural field. Switches the shape to object.
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<Arc<Spec>>) -> Self {
        let name = name.into();
        let spec = spec.into();
        match &mut self.shape {
            SpecShape::Fields(fields) => match fields.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => slot.1 = spec,
                None => fields.push((name, spec)),
            },
            shape => *shape = SpecShape::Fields(vec![(name, spec)]),
        }
        self
    }

    /// Set the item template. Switches the shape to collection.
    pub fn items(mut self, spec: impl Into<Arc<Spec>>) -> Self {
        self.shape = SpecShape::Items(spec.into());
        self
    }

    /// Attach a constant term.
    pub fn term(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.insert(name.into(), Term::Value(value.into()));
        self
    }

    /// Attach a function term, evaluated against the node on demand.
    pub fn term_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MetaGraph, MetaId) -> Value + Send + Sync + 'static,
    {
        self.terms.insert(name.into(), Term::Fn(Arc::new(f)));
        self
    }

    /// Attach a calculated field.
    pub fn calc<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MetaGraph, MetaId) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        self.calcs.retain(|(k, _)| *k != name);
        self.calcs.push((name, Arc::new(f)));
        self
    }

    pub fn with_shape(mut self, shape: SpecShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_terms(mut self, terms: BTreeMap<String, Term>) -> Self {
        self.terms = terms;
        self
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn shape(&self) -> &SpecShape {
        &self.shape
    }

    /// Structural field names in declaration order, reserved names excluded.
    pub fn field_keys(&self) -> Vec<&str> {
        match &self.shape {
            SpecShape::Fields(fields) => fields
                .iter()
                .map(|(k, _)| k.as_str())
                .filter(|k| !RESERVED_FIELD_NAMES.contains(k))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn field_spec(&self, name: &str) -> Option<&Arc<Spec>> {
        match &self.shape {
            SpecShape::Fields(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, s)| s),
            _ => None,
        }
    }

    pub fn item_spec(&self) -> Option<&Arc<Spec>> {
        match &self.shape {
            SpecShape::Items(items) => Some(items),
            _ => None,
        }
    }

    pub fn has_items(&self) -> bool {
        matches!(self.shape, SpecShape::Items(_))
    }

    pub fn get_term(&self, name: &str) -> Option<&Term> {
        self.terms.get(name)
    }

    pub fn has_term(&self, name: &str) -> bool {
        self.terms.contains_key(name)
    }

    pub fn terms(&self) -> &BTreeMap<String, Term> {
        &self.terms
    }

    pub fn calcs(&self) -> &[(String, MetaFn)] {
        &self.calcs
    }
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Spec");
        match &self.shape {
            SpecShape::Leaf => {}
            SpecShape::Fields(fields) => {
                s.field("fields", &fields.iter().map(|(k, v)| (k, v)).collect::<Vec<_>>());
            }
            SpecShape::Items(items) => {
                s.field("items", items);
            }
        }
        if !self.terms.is_empty() {
            s.field("terms", &self.terms);
        }
        if !self.calcs.is_empty() {
            s.field("calcs", &self.calcs.iter().map(|(k, _)| k).collect::<Vec<_>>());
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_keys_in_declaration_order() {
        let spec = Spec::object()
            .field("zeta", Spec::leaf())
            .field("alpha", Spec::leaf())
            .field("__typename", Spec::leaf())
            .field("mid", Spec::leaf());
        assert_eq!(spec.field_keys(), vec!["zeta", "alpha", "mid"]);
        assert!(spec.field_spec("__typename").is_some());
    }

    #[test]
    fn test_fields_and_items_exclusive() {
        let spec = Spec::object().field("a", Spec::leaf()).items(Spec::leaf());
        assert!(spec.has_items());
        assert!(spec.field_keys().is_empty());

        let spec = Spec::list(Spec::leaf()).field("a", Spec::leaf());
        assert!(!spec.has_items());
        assert_eq!(spec.field_keys(), vec!["a"]);
    }

    #[test]
    fn test_replacing_a_field_keeps_position() {
        let spec = Spec::object()
            .field("a", Spec::leaf())
            .field("b", Spec::leaf())
            .field("a", Spec::leaf().term("label", "A"));
        assert_eq!(spec.field_keys(), vec!["a", "b"]);
        assert!(spec.field_spec("a").is_some_and(|s| s.has_term("label")));
    }

    #[test]
    fn test_terms() {
        let spec = Spec::leaf()
            .term("label", "Name")
            .term_fn("hidden", |_, _| Value::Bool(false));
        assert_eq!(spec.get_term("label").and_then(Term::as_value), Some(&Value::from("Name")));
        assert!(spec.get_term("hidden").is_some_and(Term::is_fn));
        assert!(!spec.has_term("missing"));
    }
}
