//! Rule removal and node teardown.
//!
//! Each rule tracks the nodes its build touched, in creation order.
//! Removal walks that list reversed (terminal first, then joins, then
//! passthroughs and filter alphas) decrementing reference counts; a node
//! whose count reaches zero is unlinked from every parent, dropped from
//! the sharing registries, and its arena slot freed. Shared nodes with
//! surviving referents are left untouched, so removing one rule never
//! disturbs another rule's matches. Type nodes are not rule-owned and
//! always survive.

use tracing::info;

use crate::error::ReteError;
use crate::network::Network;
use crate::node::NodeId;

pub(crate) fn remove_rule(net: &mut Network, rule_id: &str) -> Result<(), ReteError> {
    if !net.rules.contains_key(rule_id) {
        return Err(ReteError::UnknownRule(rule_id.to_string()));
    }
    let nodes = net.rule_nodes.shift_remove(rule_id).unwrap_or_default();
    let mut freed = 0usize;
    for &id in nodes.iter().rev() {
        // A node may appear twice in the build order; the reference is
        // dropped on the first visit only.
        let unreferenced = match net.arena.get_mut(id) {
            Some(node) => node.remove_rule_ref(rule_id),
            None => continue,
        };
        if unreferenced {
            unlink(net, id);
            net.registry.forget_node(id);
            net.arena.free(id);
            freed += 1;
        }
    }
    net.registry.forget_rule_prefixes(rule_id);
    net.terminals.shift_remove(rule_id);
    net.rules.shift_remove(rule_id);
    info!(rule_id, freed, "rule removed");
    Ok(())
}

/// Remove every edge pointing at `id`.
fn unlink(net: &mut Network, id: NodeId) {
    let parents: Vec<NodeId> = net
        .arena
        .iter()
        .filter(|n| n.children.contains(&id))
        .map(|n| n.id)
        .collect();
    for parent in parents {
        net.arena.remove_child(parent, id);
    }
}
