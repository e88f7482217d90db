//! Join cascade construction.
//!
//! Variables join left to right in declaration order: the first two
//! passthroughs meet at cascade level one, and each further variable
//! joins the accumulated result at the next level. A join condition is
//! attached at the earliest level where every variable it mentions is
//! bound; levels with nothing to test get a passthrough condition and
//! act as pure cross products constrained by binding compatibility.
//!
//! Two sharing layers apply. The signature registry reuses a join across
//! rules when the hashed signature matches. The prefix registry reuses a
//! join within one rule when a cascade prefix over the same variable set
//! was already built; its keys embed the rule id so prefixes never leak
//! between rules that happen to reuse variable names.

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::{Condition, Rule};
use crate::decompose::decompose;
use crate::error::ReteError;
use crate::hash::JoinSignature;
use crate::memory::TokenMemory;
use crate::network::Network;
use crate::node::{JoinData, NodeId, NodeKind, TerminalData};
use crate::sharing::prefix_key;

use super::{NewEdge, SplitConstraint};

/// Wire the join cascade and terminal for one rule.
pub(crate) fn build_cascade(
    net: &mut Network,
    rule: &Rule,
    split: &SplitConstraint,
    passthroughs: &[NodeId],
    edges: &mut Vec<NewEdge>,
    rule_nodes: &mut Vec<NodeId>,
) -> Result<(), ReteError> {
    let mut left = passthroughs[0];
    let mut accumulated: Vec<String> = vec![rule.variables[0].0.clone()];
    let pool = condition_pool(split);
    let mut applied = vec![false; pool.len()];
    let var_types = rule.var_types();

    for (level, (var, _)) in rule.variables.iter().enumerate().skip(1) {
        let right = passthroughs[level];
        let mut all_vars = accumulated.clone();
        all_vars.push(var.clone());

        let level_conds = take_applicable(&pool, &mut applied, &all_vars);

        if net.config.prefix_sharing_enabled {
            let key = prefix_key(&rule.id, &all_vars);
            if let Some(&existing) = net.registry.prefixes.get(&key) {
                if let Some(node) = net.arena.get_mut(existing) {
                    node.add_rule_ref(&rule.id);
                }
                net.registry.stats.prefix_hits += 1;
                rule_nodes.push(existing);
                left = existing;
                accumulated = all_vars;
                continue;
            }
            net.registry.stats.prefix_misses += 1;
        }

        let condition = combine(level_conds);
        let decomposition = if condition.has_arithmetic() {
            Some(decompose(&condition)?)
        } else {
            None
        };

        let signature = JoinSignature {
            condition,
            left_vars: accumulated.clone(),
            right_vars: vec![var.clone()],
            all_vars: all_vars.clone(),
            var_types: restrict(&var_types, &all_vars),
            cascade_level: level,
        };
        let opts = net.config.hash_options();
        let join_key = net.hash_cache.node_id(&signature, &opts);

        let join = match net.registry.betas.get(&join_key) {
            Some(&existing) => {
                net.registry.stats.beta_nodes_reused += 1;
                debug!(key = %join_key, "join node reused");
                existing
            }
            None => {
                let id = net.arena.alloc(
                    join_key.clone(),
                    NodeKind::Join(JoinData {
                        signature,
                        decomposition,
                        left_parent: left,
                        right_parent: right,
                        left: TokenMemory::new(),
                        right: TokenMemory::new(),
                        results: TokenMemory::new(),
                    }),
                );
                net.registry.betas.insert(join_key, id);
                net.registry.stats.beta_nodes_created += 1;
                id
            }
        };
        if let Some(node) = net.arena.get_mut(join) {
            node.add_rule_ref(&rule.id);
        }

        if net.arena.add_child(left, join) {
            edges.push((left, join));
        }
        if net.arena.add_child(right, join) {
            edges.push((right, join));
        }
        if net.config.prefix_sharing_enabled {
            net.registry
                .prefixes
                .insert(prefix_key(&rule.id, &all_vars), join);
        }
        rule_nodes.push(join);
        left = join;
        accumulated = all_vars;
    }

    if let Some(i) = applied.iter().position(|&a| !a) {
        // Validation guarantees every conjunct's variables are declared,
        // so this only fires on an internal bookkeeping bug.
        return Err(ReteError::build(format!(
            "join condition '{}' was never attached to a cascade level",
            pool[i]
        )));
    }

    let terminal = net.arena.alloc(
        format!("terminal_{}", rule.id),
        NodeKind::Terminal(TerminalData {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            actions: rule.actions.clone(),
            memory: TokenMemory::new(),
        }),
    );
    if let Some(node) = net.arena.get_mut(terminal) {
        node.add_rule_ref(&rule.id);
    }
    if net.arena.add_child(left, terminal) {
        edges.push((left, terminal));
    }
    net.terminals.insert(rule.id.clone(), terminal);
    rule_nodes.push(terminal);
    Ok(())
}

/// The conditions the cascade attaches at its levels. Normally the
/// multi-variable conjuncts; a rule whose constraint is filter-only
/// instead carries its single-variable conjuncts into the signatures,
/// so two rules differing only in filters never hash to the same join.
/// The facts arriving at a join already passed those filters in the
/// alpha chains, so re-testing them on the merged token is a tautology.
fn condition_pool(split: &SplitConstraint) -> Vec<Condition> {
    if !split.joins.is_empty() {
        return split.joins.clone();
    }
    split
        .filters
        .values()
        .flat_map(|conds| conds.iter().cloned())
        .collect()
}

/// Pull out the unapplied join conditions whose variables are all bound.
fn take_applicable(
    joins: &[Condition],
    applied: &mut [bool],
    bound: &[String],
) -> Vec<Condition> {
    let mut out = Vec::new();
    for (i, cond) in joins.iter().enumerate() {
        if applied[i] {
            continue;
        }
        if cond.variables().iter().all(|v| bound.contains(v)) {
            applied[i] = true;
            out.push(cond.clone());
        }
    }
    out
}

fn combine(mut conds: Vec<Condition>) -> Condition {
    match conds.len() {
        0 => Condition::passthrough(),
        1 => conds.remove(0),
        _ => Condition::and(conds),
    }
}

fn restrict(var_types: &IndexMap<String, String>, vars: &[String]) -> IndexMap<String, String> {
    var_types
        .iter()
        .filter(|(v, _)| vars.contains(v))
        .map(|(v, t)| (v.clone(), t.clone()))
        .collect()
}
