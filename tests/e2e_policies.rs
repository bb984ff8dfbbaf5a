//! End-to-end tests for the bundled policies working together on one graph.

use std::sync::Arc;

use metagraph::policies::terminology::{self, Terminology};
use metagraph::policies::validation::{self, Validation};
use metagraph::{Extension, MetaGraph, MetaId, SetupRegistry, Spec, State, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Counts how many nodes carrying a `label` it has seen, building on the
/// mandatory flag set by validation.
struct RequiredLabels;

impl Extension for RequiredLabels {
    fn name(&self) -> &'static str {
        "required-labels"
    }

    fn terms(&self) -> &'static [&'static str] {
        &[terminology::LABEL]
    }

    fn setup(&self, graph: &MetaGraph, id: MetaId) -> Option<State> {
        let mandatory = graph.state(id).ok()?.get_bool(validation::MANDATORY).unwrap_or(false);
        Some(State::new().with("requiredLabel", mandatory))
    }
}

fn signup_spec() -> Spec {
    Spec::object()
        .term(terminology::LABEL, "Sign up")
        .field(
            "account",
            Spec::object()
                .term(terminology::LABEL, "Account")
                .field(
                    "email",
                    Spec::leaf()
                        .term(terminology::LABEL, "E-mail")
                        .term(terminology::HELP_TEXT, "We never share it")
                        .term(validation::MANDATORY, true)
                        .term_fn(validation::VALIDATOR, |g, id| match g.value(id) {
                            Ok(Value::String(s)) if s.contains('@') => Value::Bool(true),
                            _ => Value::from("Enter a valid e-mail address"),
                        }),
                )
                .field("referrer", Spec::leaf()),
        )
        .field(
            "interests",
            Spec::list(Spec::leaf().term(terminology::SYMBOL, "tag")),
        )
}

fn signup_graph(data: serde_json::Value) -> (MetaGraph, MetaId) {
    let mut registry = SetupRegistry::new();
    registry
        .register_extension(Terminology)
        .register_extension(Validation)
        .register_extension(RequiredLabels);
    let mut graph = MetaGraph::new(Arc::new(registry));
    let root = graph.metafy(signup_spec(), Value::from_json(data)).unwrap();
    (graph, root)
}

#[test]
fn test_registration_order_is_visible_to_later_extensions() {
    let (graph, root) = signup_graph(json!({}));
    let account = graph.child(root, "account").unwrap();
    let email = graph.child(account, "email").unwrap();
    let referrer = graph.child(account, "referrer").unwrap();

    assert_eq!(graph.state(email).unwrap().get_bool("requiredLabel"), Some(true));
    assert_eq!(graph.state(account).unwrap().get_bool("requiredLabel"), Some(false));
    // No label term, so the extension never ran.
    assert!(!graph.state(referrer).unwrap().contains("requiredLabel"));
    assert_eq!(
        graph.setups().names().collect::<Vec<_>>(),
        vec!["terminology", "validation", "required-labels"]
    );
}

#[test]
fn test_terminology_reads_terms_and_falls_back_to_keys() {
    let (graph, root) = signup_graph(json!({"interests": ["rust"]}));
    let account = graph.child(root, "account").unwrap();
    let email = graph.child(account, "email").unwrap();
    let referrer = graph.child(account, "referrer").unwrap();
    let interest = graph.items(graph.child(root, "interests").unwrap()).unwrap()[0];

    assert_eq!(terminology::label(&graph, email).unwrap().as_deref(), Some("E-mail"));
    let help = terminology::help_text(&graph, email).unwrap();
    assert_eq!(help.as_deref(), Some("We never share it"));
    assert_eq!(terminology::label_or_key(&graph, referrer).unwrap().as_deref(), Some("referrer"));
    assert_eq!(terminology::symbol(&graph, interest).unwrap().as_deref(), Some("tag"));
    assert_eq!(terminology::label_path(&graph, root, email).unwrap(), "Account > E-mail");
}

#[test]
fn test_validation_round_over_the_whole_form() {
    let (mut graph, root) = signup_graph(json!({"account": {"email": "nope"}}));
    let email = graph.child(graph.child(root, "account").unwrap(), "email").unwrap();

    // Nothing was visited yet.
    assert!(validation::validate_all(&mut graph, root, true).unwrap().is_empty());

    let errors = validation::validate_all(&mut graph, root, false).unwrap();
    assert_eq!(errors, vec![email]);
    assert_eq!(
        graph.state(email).unwrap().get(validation::ERROR),
        Some(&Value::from("Enter a valid e-mail address"))
    );

    graph.set_value(email, "ada@example.com").unwrap();
    assert!(validation::validate_all(&mut graph, root, true).unwrap().is_empty());
    assert!(!validation::has_error(&graph, email).unwrap());
}

#[test]
fn test_state_survives_rebase_across_policies() {
    let (mut graph, root) = signup_graph(json!({"account": {"email": "x"}}));
    let email = graph.child(graph.child(root, "account").unwrap(), "email").unwrap();
    validation::validate(&mut graph, email).unwrap();
    assert!(validation::has_error(&graph, email).unwrap());

    graph
        .rebase(root, Some(Value::from_json(json!({"account": {"email": "y"}}))))
        .unwrap();
    assert_eq!(graph.child(graph.child(root, "account").unwrap(), "email").unwrap(), email);
    assert!(validation::has_error(&graph, email).unwrap());
    assert_eq!(graph.state(email).unwrap().get_bool(validation::VALIDATED), Some(true));
}
