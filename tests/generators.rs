//! Shared builders for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tsd_rete::fact::InternalId;
use tsd_rete::network::{ActionExecutor, Activation, Network};
use tsd_rete::{CompareOp, Condition, Fact, FieldType, Rule, TypeDefinition, Value};

pub fn person_type() -> TypeDefinition {
    TypeDefinition::new(
        "Person",
        vec![("name", FieldType::String), ("age", FieldType::Number)],
    )
}

pub fn order_type() -> TypeDefinition {
    TypeDefinition::new(
        "Order",
        vec![("owner", FieldType::String), ("total", FieldType::Number)],
    )
}

pub fn person(id: &str, name: &str, age: i64) -> Arc<Fact> {
    Fact::new(
        "Person",
        id,
        vec![("name", Value::from(name)), ("age", Value::from(age))],
    )
}

pub fn order(id: &str, owner: &str, total: i64) -> Arc<Fact> {
    Fact::new(
        "Order",
        id,
        vec![("owner", Value::from(owner)), ("total", Value::from(total))],
    )
}

/// `p.age >= 18` on a single Person variable.
pub fn adult_rule(id: &str) -> Rule {
    Rule {
        id: id.to_string(),
        name: id.to_string(),
        variables: vec![("p".to_string(), "Person".to_string())],
        constraint: Condition::compare(
            CompareOp::Ge,
            Condition::field("p", "age"),
            Condition::literal(18i64),
        ),
        actions: vec![],
    }
}

/// `o.owner == p.name` joining a Person and an Order.
pub fn owner_rule(id: &str) -> Rule {
    Rule {
        id: id.to_string(),
        name: id.to_string(),
        variables: vec![
            ("p".to_string(), "Person".to_string()),
            ("o".to_string(), "Order".to_string()),
        ],
        constraint: Condition::compare(
            CompareOp::Eq,
            Condition::field("o", "owner"),
            Condition::field("p", "name"),
        ),
        actions: vec![],
    }
}

pub fn network_with_types() -> Network {
    let mut net = Network::default();
    net.add_type(person_type()).unwrap();
    net.add_type(order_type()).unwrap();
    net
}

/// Records firings and retraction notices for assertions in tests.
#[derive(Clone, Default)]
pub struct Recorder {
    pub fired: Arc<Mutex<Vec<Activation>>>,
    pub retracted: Arc<Mutex<Vec<(String, InternalId)>>>,
}

impl Recorder {
    pub fn fired_rules(&self) -> Vec<String> {
        self.fired
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.rule_id.clone())
            .collect()
    }

    pub fn retract_count(&self) -> usize {
        self.retracted.lock().unwrap().len()
    }
}

impl ActionExecutor for Recorder {
    fn execute(&mut self, activation: &Activation) {
        self.fired.lock().unwrap().push(activation.clone());
    }

    fn on_retract(&mut self, rule_id: &str, fact: &InternalId) {
        self.retracted
            .lock()
            .unwrap()
            .push((rule_id.to_string(), fact.clone()));
    }
}
