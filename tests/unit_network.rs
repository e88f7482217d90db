//! End-to-end network behavior: assertion, firing, retraction, replay.

mod generators;

use indexmap::IndexMap;
use generators::*;
use tsd_rete::{
    ast::ActionCall, error::ReteError, CompareOp, Condition, FieldType, Rule, TypeDefinition,
    Value,
};

#[test]
fn single_variable_rule_fires_on_matching_fact() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();

    net.assert_fact(person("alice", "alice", 30)).unwrap();
    net.assert_fact(person("kid", "kid", 10)).unwrap();

    let matches = net.matches_for_rule("adult");
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0].get("p").unwrap().external_id,
        "alice".to_string()
    );
}

#[test]
fn action_arguments_resolve_against_the_firing_token() {
    let mut net = network_with_types();
    let mut rule = adult_rule("adult");
    rule.actions = vec![ActionCall {
        job: "notify".to_string(),
        args: vec![
            Condition::field("p", "name"),
            Condition::literal("greeting"),
        ],
    }];
    let recorder = Recorder::default();
    net.set_executor(Box::new(recorder.clone()));
    net.add_rule(rule).unwrap();

    net.assert_fact(person("alice", "alice", 30)).unwrap();

    let fired = recorder.fired.lock().unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].actions.len(), 1);
    assert_eq!(fired[0].actions[0].job, "notify");
    assert_eq!(
        fired[0].actions[0].args,
        vec![Value::from("alice"), Value::from("greeting")]
    );
}

#[test]
fn action_arguments_keep_their_positions() {
    let mut net = network_with_types();
    let mut rule = adult_rule("adult");
    rule.actions = vec![ActionCall {
        job: "notify".to_string(),
        args: vec![
            Condition::variable("p"),
            Condition::field("p", "id"),
            Condition::field("p", "name"),
        ],
    }];
    let recorder = Recorder::default();
    net.set_executor(Box::new(recorder.clone()));
    net.add_rule(rule).unwrap();

    net.assert_fact(person("alice", "alice", 30)).unwrap();

    let fired = recorder.fired.lock().unwrap();
    assert_eq!(
        fired[0].actions[0].args,
        vec![
            Value::from("Person~alice"),
            Value::from("alice"),
            Value::from("alice"),
        ]
    );
}

#[test]
fn actions_reading_unknown_fields_are_rejected_at_add_rule() {
    let mut net = network_with_types();
    let mut rule = adult_rule("adult");
    rule.actions = vec![ActionCall {
        job: "notify".to_string(),
        args: vec![Condition::field("p", "height")],
    }];
    assert!(matches!(
        net.add_rule(rule),
        Err(ReteError::Validation(_))
    ));
}

#[test]
fn join_step_results_ride_the_matching_token() {
    use tsd_rete::ArithOp;

    let mut net = network_with_types();
    net.add_rule(Rule {
        id: "rich".to_string(),
        name: "rich".to_string(),
        variables: vec![
            ("p".to_string(), "Person".to_string()),
            ("o".to_string(), "Order".to_string()),
        ],
        constraint: Condition::and(vec![
            Condition::compare(
                CompareOp::Eq,
                Condition::field("o", "owner"),
                Condition::field("p", "name"),
            ),
            Condition::compare(
                CompareOp::Gt,
                Condition::binary(
                    ArithOp::Add,
                    Condition::field("p", "age"),
                    Condition::field("o", "total"),
                ),
                Condition::literal(70i64),
            ),
        ]),
        actions: vec![],
    })
    .unwrap();

    net.assert_fact(person("alice", "alice", 30)).unwrap();
    net.assert_fact(order("o1", "alice", 50)).unwrap();

    let matches = net.matches_for_rule("rich");
    assert_eq!(matches.len(), 1);
    // The decomposed sum computed by the join stays on the token.
    assert_eq!(matches[0].results.get("temp_1"), Some(&Value::from(80i64)));
}

#[test]
fn duplicate_assertion_is_rejected_without_side_effects() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    net.assert_fact(person("alice", "alice", 30)).unwrap();
    assert!(matches!(
        net.assert_fact(person("alice", "alice", 30)),
        Err(ReteError::DuplicateFact(_))
    ));
    assert_eq!(net.fact_count(), 1);
    assert_eq!(net.matches_for_rule("adult").len(), 1);
    assert_eq!(net.take_activations().len(), 1);
}

#[test]
fn rules_added_after_facts_see_them() {
    let mut net = network_with_types();
    net.assert_fact(person("alice", "alice", 30)).unwrap();
    net.assert_fact(order("o1", "alice", 50)).unwrap();

    net.add_rule(owner_rule("own")).unwrap();
    let matches = net.matches_for_rule("own");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].get("o").unwrap().external_id, "o1".to_string());
}

#[test]
fn retraction_removes_matches_and_notifies_once_per_rule() {
    let mut net = network_with_types();
    let recorder = Recorder::default();
    net.set_executor(Box::new(recorder.clone()));
    net.add_rule(owner_rule("own")).unwrap();

    net.assert_fact(person("alice", "alice", 30)).unwrap();
    net.assert_fact(order("o1", "alice", 50)).unwrap();
    net.assert_fact(order("o2", "alice", 70)).unwrap();
    assert_eq!(net.matches_for_rule("own").len(), 2);

    let id = person("alice", "alice", 30).internal_id();
    net.retract_fact(&id).unwrap();
    assert!(net.matches_for_rule("own").is_empty());
    // Both matches died but the rule is notified once.
    assert_eq!(recorder.retract_count(), 1);
    assert!(!net.contains_fact(&id));
}

#[test]
fn retracting_unknown_fact_is_a_noop() {
    let mut net = network_with_types();
    let id = person("ghost", "ghost", 1).internal_id();
    assert!(net.retract_fact(&id).is_ok());
    assert!(net.retract_fact(&id).is_ok());
    assert_eq!(net.fact_count(), 0);
}

#[test]
fn same_external_id_coexists_across_types() {
    let mut net = network_with_types();
    net.assert_fact(person("E", "e", 1)).unwrap();
    net.assert_fact(order("E", "e", 1)).unwrap();
    assert_eq!(net.fact_count(), 2);
}

#[test]
fn type_validation_rejects_bad_facts() {
    let mut net = network_with_types();
    let wrong_kind = tsd_rete::Fact::new("Person", "x", vec![("name", Value::from("x")), ("age", Value::from("old"))]);
    assert!(matches!(
        net.assert_fact(wrong_kind),
        Err(ReteError::Validation(_))
    ));
    let unknown = tsd_rete::Fact::new("Ghost", "x", vec![]);
    assert!(matches!(
        net.assert_fact(unknown),
        Err(ReteError::UnknownType(_))
    ));
}

#[test]
fn primary_keys_synthesize_fact_ids() {
    let mut net = tsd_rete::network::Network::default();
    net.add_type(
        TypeDefinition::new(
            "Reading",
            vec![("sensor", FieldType::String), ("value", FieldType::Number)],
        )
        .with_primary_keys(vec!["sensor"]),
    )
    .unwrap();

    let mut fields = IndexMap::new();
    fields.insert("sensor".to_string(), Value::from("s1"));
    fields.insert("value".to_string(), Value::from(7i64));
    let id = net.assert_keyed("Reading", fields).unwrap();
    assert_eq!(id.as_str(), "Reading~s1");
    assert!(net.contains_fact(&id));

    net.add_type(TypeDefinition::new(
        "Sample",
        vec![("label", FieldType::String)],
    ))
    .unwrap();
    let mut fields = IndexMap::new();
    fields.insert("label".to_string(), Value::from("x"));
    // Keyless types fall back to a content-hash id, so the same content
    // is the same fact.
    let hashed = net.assert_keyed("Sample", fields.clone()).unwrap();
    assert!(hashed.as_str().starts_with("Sample~"));
    assert!(matches!(
        net.assert_keyed("Sample", fields),
        Err(ReteError::DuplicateFact(_))
    ));
}

#[test]
fn duplicate_rule_ids_are_rejected() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    assert!(matches!(
        net.add_rule(adult_rule("adult")),
        Err(ReteError::DuplicateRule(_))
    ));
}

#[test]
fn undeclared_variable_in_constraint_is_rejected() {
    let mut net = network_with_types();
    let rule = Rule {
        id: "bad".to_string(),
        name: "bad".to_string(),
        variables: vec![("p".to_string(), "Person".to_string())],
        constraint: Condition::compare(
            CompareOp::Eq,
            Condition::field("q", "age"),
            Condition::literal(1i64),
        ),
        actions: vec![],
    };
    assert!(net.add_rule(rule).is_err());
}

#[test]
fn clear_memories_keeps_structure() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    net.assert_fact(person("alice", "alice", 30)).unwrap();
    let nodes_before = net.node_count();

    net.clear_memories();
    assert_eq!(net.fact_count(), 0);
    assert!(net.matches_for_rule("adult").is_empty());
    assert_eq!(net.node_count(), nodes_before);

    // Structure is intact, so facts flow again.
    net.assert_fact(person("bob", "bob", 40)).unwrap();
    assert_eq!(net.matches_for_rule("adult").len(), 1);
}

#[test]
fn reset_keep_types_preserves_the_catalog() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    net.assert_fact(person("alice", "alice", 30)).unwrap();

    net.reset_keep_types();
    assert!(net.rule_ids().is_empty());
    assert_eq!(net.fact_count(), 0);
    // Types survived: re-adding the rule and a fact works without
    // re-declaring anything.
    net.add_rule(adult_rule("adult")).unwrap();
    net.assert_fact(person("alice", "alice", 30)).unwrap();
    assert_eq!(net.matches_for_rule("adult").len(), 1);
}

#[test]
fn rule_info_reports_footprint() {
    let mut net = network_with_types();
    net.add_rule(owner_rule("own")).unwrap();
    net.assert_fact(person("alice", "alice", 30)).unwrap();
    net.assert_fact(order("o1", "alice", 50)).unwrap();

    let info = net.rule_info("own").unwrap();
    assert_eq!(info.id, "own");
    assert_eq!(info.variables.len(), 2);
    assert_eq!(info.match_count, 1);
    assert!(info.node_keys.iter().any(|k| k.starts_with("passthrough_own_")));
    assert!(info.node_keys.iter().any(|k| k.starts_with("beta_")));
    assert!(matches!(
        net.rule_info("missing"),
        Err(ReteError::UnknownRule(_))
    ));
}

#[test]
fn shared_handle_serializes_concurrent_assertions() {
    use std::thread;
    use tsd_rete::SharedNetwork;

    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    let shared = SharedNetwork::new(net);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let shared = shared.clone();
            thread::spawn(move || {
                let id = format!("p{i}");
                shared.assert_fact(person(&id, &id, 20 + i)).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(shared.fact_count(), 8);
    assert_eq!(shared.matches_for_rule("adult").len(), 8);
}
