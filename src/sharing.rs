//! Node sharing registries and statistics.
//!
//! Structural sharing is what keeps the network from exploding with rule
//! count. Three registries map stable keys to live nodes:
//!
//! - filter alphas, keyed by parent node key plus condition fingerprint,
//!   shared freely across rules;
//! - join nodes, keyed by their `beta_` signature hash, shared when two
//!   rules need the same join at the same cascade level;
//! - cascade prefixes, keyed by rule id plus the sorted variable set a
//!   join has accumulated. The rule id in the key scopes prefix reuse to
//!   one rule: two rules may bind the same variable names to different
//!   types, so a cross-rule prefix hit would resolve variables against
//!   the wrong cascade.
//!
//! Passthrough alphas get a registry too, but their keys embed the rule
//! id, the variable, the type, and the join side, so they are never
//! shared; the registry exists for teardown and introspection.

use indexmap::IndexMap;

use crate::node::NodeId;

/// Key for a per-rule passthrough alpha.
pub fn passthrough_key(rule_id: &str, var: &str, type_name: &str, side: Option<&str>) -> String {
    match side {
        Some(s) => format!("passthrough_{}_{}_{}_{}", rule_id, var, type_name, s),
        None => format!("passthrough_{}_{}_{}", rule_id, var, type_name),
    }
}

/// Key for a rule-scoped cascade prefix over the given variables.
pub fn prefix_key(rule_id: &str, vars: &[String]) -> String {
    let mut sorted = vars.to_vec();
    sorted.sort();
    format!("{}|{}", rule_id, sorted.join(","))
}

/// Key for a shared filter alpha under a parent node.
pub fn alpha_key(parent_key: &str, fingerprint: &str) -> String {
    format!("{}|{}", parent_key, fingerprint)
}

#[derive(Debug, Default)]
pub struct SharingRegistry {
    pub alphas: IndexMap<String, NodeId>,
    pub betas: IndexMap<String, NodeId>,
    pub passthroughs: IndexMap<String, NodeId>,
    pub prefixes: IndexMap<String, NodeId>,
    pub stats: SharingStats,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharingStats {
    pub alpha_nodes_created: u64,
    pub alpha_nodes_reused: u64,
    pub beta_nodes_created: u64,
    pub beta_nodes_reused: u64,
    pub prefix_hits: u64,
    pub prefix_misses: u64,
}

impl SharingStats {
    pub fn alpha_reuse_rate(&self) -> f64 {
        let total = self.alpha_nodes_created + self.alpha_nodes_reused;
        if total == 0 {
            return 0.0;
        }
        self.alpha_nodes_reused as f64 / total as f64
    }

    pub fn beta_reuse_rate(&self) -> f64 {
        let total = self.beta_nodes_created + self.beta_nodes_reused;
        if total == 0 {
            return 0.0;
        }
        self.beta_nodes_reused as f64 / total as f64
    }
}

impl SharingRegistry {
    pub fn new() -> SharingRegistry {
        SharingRegistry::default()
    }

    /// Drop every registry entry pointing at the given node.
    pub fn forget_node(&mut self, id: NodeId) {
        self.alphas.retain(|_, v| *v != id);
        self.betas.retain(|_, v| *v != id);
        self.passthroughs.retain(|_, v| *v != id);
        self.prefixes.retain(|_, v| *v != id);
    }

    /// Drop the prefix entries belonging to one rule.
    pub fn forget_rule_prefixes(&mut self, rule_id: &str) {
        let marker = format!("{}|", rule_id);
        self.prefixes.retain(|k, _| !k.starts_with(&marker));
    }

    pub fn clear(&mut self) {
        self.alphas.clear();
        self.betas.clear();
        self.passthroughs.clear();
        self.prefixes.clear();
        self.stats = SharingStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_keys_embed_rule_and_side() {
        assert_eq!(
            passthrough_key("r1", "p", "Person", None),
            "passthrough_r1_p_Person"
        );
        assert_eq!(
            passthrough_key("r1", "p", "Person", Some("left")),
            "passthrough_r1_p_Person_left"
        );
    }

    #[test]
    fn prefix_keys_are_rule_scoped_and_order_insensitive() {
        let a = prefix_key("r1", &["p".to_string(), "o".to_string()]);
        let b = prefix_key("r1", &["o".to_string(), "p".to_string()]);
        let c = prefix_key("r2", &["p".to_string(), "o".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn forget_rule_prefixes_spares_other_rules() {
        let mut reg = SharingRegistry::new();
        reg.prefixes
            .insert(prefix_key("r1", &["p".to_string()]), 3);
        reg.prefixes
            .insert(prefix_key("r2", &["p".to_string()]), 4);
        reg.forget_rule_prefixes("r1");
        assert_eq!(reg.prefixes.len(), 1);
        assert!(reg.prefixes.contains_key(&prefix_key("r2", &["p".to_string()])));
    }
}
