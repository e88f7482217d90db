//! Rule compilation into network nodes.
//!
//! Building a rule happens in three phases. The constraint is first split
//! into per-variable filter conditions and multi-variable join conditions
//! by flattening its conjunction. Each variable then gets an alpha chain:
//! shared filter nodes hanging off its type node, capped by a per-rule
//! passthrough. Finally the passthroughs are joined pairwise into a
//! cascade in variable declaration order, with join conditions attached
//! at the earliest level where all their variables are bound, and a
//! terminal collects complete matches.
//!
//! Builders return the list of edges they actually created so the network
//! can replay live facts into the new subgraph only.

mod alpha;
mod beta;

use indexmap::IndexMap;

use crate::ast::{Condition, Rule};
use crate::error::ReteError;
use crate::network::Network;
use crate::node::NodeId;

/// An edge created during a build, `(parent, child)`.
pub(crate) type NewEdge = (NodeId, NodeId);

/// The constraint split into alpha-testable and join-testable parts.
pub(crate) struct SplitConstraint {
    /// Single-variable conjuncts, keyed by variable.
    pub filters: IndexMap<String, Vec<Condition>>,
    /// Conjuncts spanning two or more variables.
    pub joins: Vec<Condition>,
}

/// Compile one rule into the network. Returns every newly created edge.
pub(crate) fn build_rule(net: &mut Network, rule: &Rule) -> Result<Vec<NewEdge>, ReteError> {
    validate_rule(net, rule)?;
    let split = split_constraint(rule);
    let mut edges = Vec::new();
    let mut rule_nodes = Vec::new();

    let passthroughs =
        alpha::build_alpha_chains(net, rule, &split, &mut edges, &mut rule_nodes)?;
    beta::build_cascade(net, rule, &split, &passthroughs, &mut edges, &mut rule_nodes)?;

    net.rule_nodes.insert(rule.id.clone(), rule_nodes);
    Ok(edges)
}

fn validate_rule(net: &Network, rule: &Rule) -> Result<(), ReteError> {
    if rule.variables.is_empty() {
        return Err(ReteError::validation(format!(
            "rule '{}' declares no variables",
            rule.id
        )));
    }
    if matches!(&rule.constraint, Condition::And { operands } | Condition::Or { operands } if operands.is_empty())
    {
        return Err(ReteError::validation(format!(
            "rule '{}' constraint has no conditions",
            rule.id
        )));
    }
    let mut seen = Vec::new();
    for (var, type_name) in &rule.variables {
        if seen.contains(var) {
            return Err(ReteError::validation(format!(
                "rule '{}' declares variable '{}' twice",
                rule.id, var
            )));
        }
        seen.push(var.clone());
        if net.type_definition(type_name).is_none() {
            return Err(ReteError::UnknownType(type_name.clone()));
        }
    }
    for var in rule.constraint.variables() {
        if rule.variable_type(&var).is_none() {
            return Err(ReteError::validation(format!(
                "rule '{}' constraint references undeclared variable '{}'",
                rule.id, var
            )));
        }
    }
    for action in &rule.actions {
        for arg in &action.args {
            for var in arg.variables() {
                if rule.variable_type(&var).is_none() {
                    return Err(ReteError::validation(format!(
                        "rule '{}' action '{}' references undeclared variable '{}'",
                        rule.id, action.job, var
                    )));
                }
            }
            let mut accesses = Vec::new();
            field_accesses(arg, &mut accesses);
            for (object, field) in accesses {
                // `id` always resolves, to the fact's external id.
                if field == "id" {
                    continue;
                }
                let known = rule
                    .variable_type(&object)
                    .and_then(|t| net.type_definition(t))
                    .is_some_and(|def| def.field_type(&field).is_some());
                if !known {
                    return Err(ReteError::validation(format!(
                        "rule '{}' action '{}' reads unknown field '{}.{}'",
                        rule.id, action.job, object, field
                    )));
                }
            }
        }
    }
    Ok(())
}

fn field_accesses(cond: &Condition, out: &mut Vec<(String, String)>) {
    match cond {
        Condition::FieldAccess { object, field } => {
            out.push((object.clone(), field.clone()));
        }
        Condition::BinaryOp { left, right, .. } | Condition::Comparison { left, right, .. } => {
            field_accesses(left, out);
            field_accesses(right, out);
        }
        Condition::And { operands } | Condition::Or { operands } => {
            for op in operands {
                field_accesses(op, out);
            }
        }
        Condition::Not { constraint } => field_accesses(constraint, out),
        _ => {}
    }
}

/// Flatten the constraint's conjunction and bucket each conjunct. A
/// conjunct mentioning no variable at all is constant; it rides along on
/// the first variable's filter chain.
pub(crate) fn split_constraint(rule: &Rule) -> SplitConstraint {
    let mut conjuncts = Vec::new();
    flatten_and(&rule.constraint, &mut conjuncts);

    let mut filters: IndexMap<String, Vec<Condition>> = rule
        .variables
        .iter()
        .map(|(v, _)| (v.clone(), Vec::new()))
        .collect();
    let mut joins = Vec::new();
    let first_var = rule.variables[0].0.clone();

    for conjunct in conjuncts {
        if conjunct.is_passthrough() {
            continue;
        }
        let vars = conjunct.variables();
        match vars.len() {
            0 => filters[&first_var].push(conjunct),
            1 => filters[&vars[0]].push(conjunct),
            _ => joins.push(conjunct),
        }
    }
    SplitConstraint { filters, joins }
}

fn flatten_and(cond: &Condition, out: &mut Vec<Condition>) {
    match cond {
        Condition::And { operands } => {
            for op in operands {
                flatten_and(op, out);
            }
        }
        other => out.push(other.clone()),
    }
}
