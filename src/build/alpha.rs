//! Alpha chain construction.
//!
//! Filter conditions for one variable chain off its type node. Each link
//! is keyed by its parent's key plus the variable-normalized condition
//! fingerprint, so two rules filtering the same type the same way share
//! the chain regardless of what they named the variable. The chain ends
//! in a per-rule passthrough node that binds admitted facts to the rule's
//! own variable name and feeds the join cascade.

use tracing::debug;

use crate::ast::{Condition, Rule};
use crate::decompose::{decompose, Decomposition};
use crate::error::ReteError;
use crate::fact::ID_SEPARATOR;
use crate::hash::condition_fingerprint;
use crate::memory::FactMemory;
use crate::network::Network;
use crate::node::{AlphaData, JoinSide, NodeId, NodeKind, PassthroughTag};
use crate::sharing::{alpha_key, passthrough_key};

use super::{NewEdge, SplitConstraint};

/// Placeholder variable shared filter conditions are normalized to.
const NORM_VAR: &str = "_";

/// Build every variable's alpha chain. Returns the passthrough node for
/// each variable in declaration order.
pub(crate) fn build_alpha_chains(
    net: &mut Network,
    rule: &Rule,
    split: &SplitConstraint,
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> Result<Vec<NodeId>, ReteError> {
    let mut passthroughs = Vec::with_capacity(rule.variables.len());
    for (i, (var, type_name)) in rule.variables.iter().enumerate() {
        let type_node = *net
            .type_nodes
            .get(type_name)
            .ok_or_else(|| ReteError::UnknownType(type_name.clone()))?;

        let mut parent = type_node;
        for cond in &split.filters[var] {
            parent = if cond.has_arithmetic() {
                arithmetic_chain(net, parent, &rule.id, var, cond, edges, rule_nodes)?
            } else {
                filter_alpha(net, parent, &rule.id, var, cond, edges, rule_nodes)
            };
        }

        let side = join_side_for(i, rule.variables.len());
        let pt = passthrough(net, parent, rule, var, type_name, side, edges, rule_nodes)?;
        passthroughs.push(pt);
    }
    Ok(passthroughs)
}

fn join_side_for(index: usize, var_count: usize) -> Option<JoinSide> {
    if var_count < 2 {
        None
    } else if index == 0 {
        Some(JoinSide::Left)
    } else {
        Some(JoinSide::Right)
    }
}

/// Find or create one shared filter alpha under `parent`.
fn filter_alpha(
    net: &mut Network,
    parent: NodeId,
    rule_id: &str,
    var: &str,
    cond: &Condition,
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> NodeId {
    let normalized = normalize_variable(cond, var, NORM_VAR);
    chain_link(net, parent, rule_id, normalized, None, edges, rule_nodes)
}

/// Expand an arithmetic filter into one node per decomposed step plus a
/// final comparison node. Step nodes are keyed by the structure of their
/// expression, so rules computing the same sub-expression share them and
/// only diverge at the comparison.
#[allow(clippy::too_many_arguments)]
fn arithmetic_chain(
    net: &mut Network,
    parent: NodeId,
    rule_id: &str,
    var: &str,
    cond: &Condition,
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> Result<NodeId, ReteError> {
    let normalized = normalize_variable(cond, var, NORM_VAR);
    let decomp = decompose(&normalized)?;
    let mut parent = parent;
    for step in &decomp.steps {
        let expr = Condition::binary(step.operator, step.left.clone(), step.right.clone());
        parent = chain_link(net, parent, rule_id, expr, None, edges, rule_nodes);
    }
    let rewritten = decomp.rewritten.clone();
    Ok(chain_link(
        net,
        parent,
        rule_id,
        rewritten,
        Some(decomp),
        edges,
        rule_nodes,
    ))
}

/// Find or create one link of a filter chain. `cond` is already
/// variable-normalized.
#[allow(clippy::too_many_arguments)]
fn chain_link(
    net: &mut Network,
    parent: NodeId,
    rule_id: &str,
    cond: Condition,
    decomposition: Option<Decomposition>,
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> NodeId {
    let fingerprint = condition_fingerprint(&cond, &net.config.hash_options());
    let parent_key = net
        .arena
        .get(parent)
        .map(|n| n.key.clone())
        .unwrap_or_default();
    let key = alpha_key(&parent_key, &fingerprint);

    if let Some(&existing) = net.registry.alphas.get(&key) {
        if let Some(node) = net.arena.get_mut(existing) {
            node.add_rule_ref(rule_id);
        }
        net.registry.stats.alpha_nodes_reused += 1;
        rule_nodes.push(existing);
        debug!(%key, "filter alpha reused");
        return existing;
    }

    let id = net.arena.alloc(
        key.clone(),
        NodeKind::Alpha(AlphaData {
            condition: cond,
            var: NORM_VAR.to_string(),
            memory: FactMemory::new(),
            decomposition,
            passthrough_for: None,
        }),
    );
    if let Some(node) = net.arena.get_mut(id) {
        node.add_rule_ref(rule_id);
    }
    if net.arena.add_child(parent, id) {
        edges.push((parent, id));
    }
    net.registry.alphas.insert(key, id);
    net.registry.stats.alpha_nodes_created += 1;
    rule_nodes.push(id);
    id
}

/// Create the per-rule passthrough capping a variable's chain.
#[allow(clippy::too_many_arguments)]
fn passthrough(
    net: &mut Network,
    parent: NodeId,
    rule: &Rule,
    var: &str,
    type_name: &str,
    side: Option<JoinSide>,
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> Result<NodeId, ReteError> {
    if var.contains(ID_SEPARATOR) {
        return Err(ReteError::validation(format!(
            "variable name '{}' contains reserved separator",
            var
        )));
    }
    let side_str = side.map(|s| match s {
        JoinSide::Left => "left",
        JoinSide::Right => "right",
    });
    let key = passthrough_key(&rule.id, var, type_name, side_str);
    let id = net.arena.alloc(
        key.clone(),
        NodeKind::Alpha(AlphaData {
            condition: Condition::passthrough(),
            var: var.to_string(),
            memory: FactMemory::new(),
            decomposition: None,
            passthrough_for: Some(PassthroughTag {
                rule_id: rule.id.clone(),
                side,
            }),
        }),
    );
    if let Some(node) = net.arena.get_mut(id) {
        node.add_rule_ref(&rule.id);
    }
    if net.arena.add_child(parent, id) {
        edges.push((parent, id));
    }
    net.registry.passthroughs.insert(key, id);
    rule_nodes.push(id);
    Ok(id)
}

/// Rewrite every reference to `from` in a single-variable condition to
/// `to`, so structurally equal filters hash equal across rules.
pub(crate) fn normalize_variable(cond: &Condition, from: &str, to: &str) -> Condition {
    match cond {
        Condition::Variable { name } if name == from => Condition::variable(to),
        Condition::FieldAccess { object, field } if object == from => {
            Condition::field(to, field)
        }
        Condition::BinaryOp {
            operator,
            left,
            right,
        } => Condition::BinaryOp {
            operator: *operator,
            left: Box::new(normalize_variable(left, from, to)),
            right: Box::new(normalize_variable(right, from, to)),
        },
        Condition::Comparison {
            operator,
            left,
            right,
        } => Condition::Comparison {
            operator: *operator,
            left: Box::new(normalize_variable(left, from, to)),
            right: Box::new(normalize_variable(right, from, to)),
        },
        Condition::And { operands } => Condition::And {
            operands: operands
                .iter()
                .map(|c| normalize_variable(c, from, to))
                .collect(),
        },
        Condition::Or { operands } => Condition::Or {
            operands: operands
                .iter()
                .map(|c| normalize_variable(c, from, to))
                .collect(),
        },
        Condition::Not { constraint } => Condition::Not {
            constraint: Box::new(normalize_variable(constraint, from, to)),
        },
        other => other.clone(),
    }
}
