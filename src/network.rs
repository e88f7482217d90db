//! The discrimination network.
//!
//! `Network` owns the node arena, the type catalog, the rule set, and the
//! sharing registries. Facts are asserted at the root and flow through
//! type, alpha, join, and terminal nodes; complete matches fire rule
//! actions through an [`ActionExecutor`].
//!
//! Propagation is a work queue rather than recursion: each step pops a
//! task, mutates exactly one node, and enqueues tasks for that node's
//! children. This keeps borrows local and makes the wave order explicit.
//! Memories deduplicate on identity, so replaying a fact into an already
//! fed subgraph is a no-op and rule additions can seed their new nodes
//! from live parents without double-firing.

use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ast::{ActionCall, Condition, Rule, TypeDefinition};
use crate::build;
use crate::config::ReteConfig;
use crate::error::ReteError;
use crate::eval::{eval_bool, eval_filter, eval_value};
use crate::fact::{Fact, InternalId, ID_SEPARATOR};
use crate::hash::HashCache;
use crate::lifecycle;
use crate::memory::FactMemory;
use crate::node::{JoinData, NodeArena, NodeId, NodeKind, TerminalData};
use crate::sharing::{SharingRegistry, SharingStats};
use crate::token::Token;
use crate::value::Value;

/// A rule firing: the complete token plus the resolved action calls.
#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub rule_id: String,
    pub rule_name: String,
    pub token: Token,
    pub actions: Vec<ResolvedAction>,
}

/// An action call with its arguments evaluated against the firing token.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAction {
    pub job: String,
    pub args: Vec<Value>,
}

/// Receives rule firings and retraction notices.
pub trait ActionExecutor: Send {
    fn execute(&mut self, activation: &Activation);

    /// Called once per rule when a retracted fact invalidated at least one
    /// of that rule's matches.
    fn on_retract(&mut self, _rule_id: &str, _fact: &InternalId) {}
}

/// Summary of one rule's footprint in the network.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleInfo {
    pub id: String,
    pub name: String,
    pub variables: Vec<(String, String)>,
    pub node_keys: Vec<String>,
    pub match_count: usize,
}

enum Task {
    Fact { node: NodeId, fact: Arc<Fact> },
    Token { node: NodeId, token: Token },
    Retract { node: NodeId, id: InternalId },
}

pub struct Network {
    pub(crate) arena: NodeArena,
    pub(crate) root: NodeId,
    pub(crate) types: IndexMap<String, TypeDefinition>,
    pub(crate) type_nodes: IndexMap<String, NodeId>,
    pub(crate) rules: IndexMap<String, Rule>,
    /// Nodes each rule reaches, in creation order; teardown walks this
    /// reversed.
    pub(crate) rule_nodes: IndexMap<String, Vec<NodeId>>,
    pub(crate) terminals: IndexMap<String, NodeId>,
    pub(crate) registry: SharingRegistry,
    pub(crate) hash_cache: HashCache,
    pub(crate) config: ReteConfig,
    facts: FactMemory,
    executor: Option<Box<dyn ActionExecutor>>,
    activations: Vec<Activation>,
}

impl Network {
    pub fn new(config: ReteConfig) -> Network {
        let mut arena = NodeArena::new();
        let root = arena.alloc("root".to_string(), NodeKind::Root);
        let cache_size = config.beta_hash_cache_max_size;
        Network {
            arena,
            root,
            types: IndexMap::new(),
            type_nodes: IndexMap::new(),
            rules: IndexMap::new(),
            rule_nodes: IndexMap::new(),
            terminals: IndexMap::new(),
            registry: SharingRegistry::new(),
            hash_cache: HashCache::new(cache_size),
            config,
            facts: FactMemory::new(),
            executor: None,
            activations: Vec::new(),
        }
    }

    pub fn set_executor(&mut self, executor: Box<dyn ActionExecutor>) {
        self.executor = Some(executor);
    }

    // ========================================================================
    // TYPES
    // ========================================================================

    pub fn add_type(&mut self, def: TypeDefinition) -> Result<(), ReteError> {
        if self.types.contains_key(&def.name) {
            return Err(ReteError::validation(format!(
                "type '{}' already declared",
                def.name
            )));
        }
        // Internal ids are `Type~id`; a separator in the type name would
        // make them ambiguous.
        if def.name.contains(ID_SEPARATOR) {
            return Err(ReteError::validation(format!(
                "type name '{}' contains reserved separator",
                def.name
            )));
        }
        let node = self.arena.alloc(
            def.name.clone(),
            NodeKind::Type {
                type_name: def.name.clone(),
                memory: FactMemory::new(),
            },
        );
        self.arena.add_child(self.root, node);
        self.type_nodes.insert(def.name.clone(), node);
        debug!(type_name = %def.name, "type declared");
        self.types.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    // ========================================================================
    // RULES
    // ========================================================================

    pub fn add_rule(&mut self, rule: Rule) -> Result<(), ReteError> {
        if self.rules.contains_key(&rule.id) {
            return Err(ReteError::DuplicateRule(rule.id));
        }
        let new_edges = build::build_rule(self, &rule)?;
        info!(rule_id = %rule.id, nodes = new_edges.len(), "rule added");
        self.rules.insert(rule.id.clone(), rule);
        // Seed new edges from their live parents so existing facts reach
        // the new rule.
        let mut tasks = VecDeque::new();
        for (parent, child) in new_edges {
            self.replay_edge(parent, child, &mut tasks);
        }
        self.drain(tasks);
        Ok(())
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Result<(), ReteError> {
        lifecycle::remove_rule(self, rule_id)
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    pub fn rule_info(&self, rule_id: &str) -> Result<RuleInfo, ReteError> {
        let rule = self
            .rules
            .get(rule_id)
            .ok_or_else(|| ReteError::UnknownRule(rule_id.to_string()))?;
        let node_keys = self
            .rule_nodes
            .get(rule_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&id| self.arena.get(id).map(|n| n.key.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RuleInfo {
            id: rule.id.clone(),
            name: rule.name.clone(),
            variables: rule.variables.clone(),
            node_keys,
            match_count: self.matches_for_rule(rule_id).len(),
        })
    }

    /// Complete matches currently held by a rule's terminal.
    pub fn matches_for_rule(&self, rule_id: &str) -> Vec<Token> {
        self.terminals
            .get(rule_id)
            .and_then(|&id| self.arena.get(id))
            .and_then(|n| match &n.kind {
                NodeKind::Terminal(t) => Some(t.memory.iter().cloned().collect()),
                _ => None,
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // FACTS
    // ========================================================================

    pub fn assert_fact(&mut self, fact: Arc<Fact>) -> Result<(), ReteError> {
        let def = self
            .types
            .get(&fact.type_name)
            .ok_or_else(|| ReteError::UnknownType(fact.type_name.clone()))?;
        fact.validate(def)?;
        if !self.facts.insert(fact.clone()) {
            return Err(ReteError::DuplicateFact(fact.internal_id().to_string()));
        }
        debug!(fact = %fact.internal_id(), "fact asserted");
        let mut tasks = VecDeque::new();
        tasks.push_back(Task::Fact {
            node: self.root,
            fact,
        });
        self.drain(tasks);
        Ok(())
    }

    /// Assert a fact without an explicit id, synthesizing one from the
    /// type's primary keys or, for keyless types, from a content hash.
    pub fn assert_keyed(
        &mut self,
        type_name: &str,
        fields: IndexMap<String, Value>,
    ) -> Result<InternalId, ReteError> {
        let def = self
            .types
            .get(type_name)
            .ok_or_else(|| ReteError::UnknownType(type_name.to_string()))?;
        let external_id = Fact::synthesize_id(def, &fields);
        let fact = Arc::new(Fact {
            type_name: type_name.to_string(),
            external_id,
            fields,
        });
        let id = fact.internal_id();
        self.assert_fact(fact)?;
        Ok(id)
    }

    pub fn retract_fact(&mut self, id: &InternalId) -> Result<(), ReteError> {
        if self.facts.remove(id).is_none() {
            // Retracting an absent fact is a no-op, so retraction can be
            // replayed safely.
            debug!(fact = %id, "retraction of absent fact ignored");
            return Ok(());
        }
        debug!(fact = %id, "fact retracted");
        let mut tasks = VecDeque::new();
        tasks.push_back(Task::Retract {
            node: self.root,
            id: id.clone(),
        });
        self.drain(tasks);
        Ok(())
    }

    pub fn contains_fact(&self, id: &InternalId) -> bool {
        self.facts.contains(id)
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    // ========================================================================
    // PROPAGATION
    // ========================================================================

    fn drain(&mut self, mut tasks: VecDeque<Task>) {
        let mut pending_fires = Vec::new();
        while let Some(task) = tasks.pop_front() {
            match task {
                Task::Fact { node, fact } => self.on_fact(node, fact, &mut tasks),
                Task::Token { node, token } => {
                    self.on_token(node, token, &mut tasks, &mut pending_fires)
                }
                Task::Retract { node, id } => self.on_retract(node, id, &mut tasks),
            }
        }
        for activation in pending_fires {
            if let Some(executor) = self.executor.as_mut() {
                executor.execute(&activation);
            }
            self.activations.push(activation);
        }
    }

    fn on_fact(&mut self, node_id: NodeId, fact: Arc<Fact>, tasks: &mut VecDeque<Task>) {
        let mut fan_fact = false;
        let mut emit_token = None;
        {
            let node = match self.arena.get_mut(node_id) {
                Some(n) => n,
                None => return,
            };
            match &mut node.kind {
                NodeKind::Root => fan_fact = true,
                NodeKind::Type { type_name, memory } => {
                    if *type_name == fact.type_name && memory.insert(fact.clone()) {
                        fan_fact = true;
                    }
                }
                NodeKind::Alpha(alpha) => {
                    let passes = if alpha.passthrough_for.is_some() {
                        true
                    } else if matches!(alpha.condition, Condition::BinaryOp { .. }) {
                        // Arithmetic step nodes exist for structural
                        // sharing; the chain's final comparison runs the
                        // whole decomposition.
                        true
                    } else if let Some(decomp) = &alpha.decomposition {
                        let bound = Token::of(&alpha.var, fact.clone());
                        let temps = decomp.execute(&bound);
                        eval_bool(&decomp.rewritten, &bound, &temps)
                    } else {
                        eval_filter(&alpha.condition, &alpha.var, &fact)
                    };
                    if passes && alpha.memory.insert(fact.clone()) {
                        if alpha.passthrough_for.is_some() {
                            emit_token = Some(Token::of(&alpha.var, fact.clone()));
                        } else {
                            fan_fact = true;
                        }
                    }
                }
                NodeKind::Join(_) | NodeKind::Terminal(_) => {}
            }
        }
        if fan_fact {
            for child in self.arena.children_of(node_id) {
                tasks.push_back(Task::Fact {
                    node: child,
                    fact: fact.clone(),
                });
            }
        }
        if let Some(token) = emit_token {
            for child in self.arena.children_of(node_id) {
                tasks.push_back(Task::Token {
                    node: child,
                    token: token.clone(),
                });
            }
        }
    }

    fn on_token(
        &mut self,
        node_id: NodeId,
        token: Token,
        tasks: &mut VecDeque<Task>,
        fires: &mut Vec<Activation>,
    ) {
        let mut outputs = Vec::new();
        let mut fired = None;
        {
            let node = match self.arena.get_mut(node_id) {
                Some(n) => n,
                None => return,
            };
            match &mut node.kind {
                NodeKind::Join(join) => {
                    outputs = join_token(join, token);
                }
                NodeKind::Terminal(term) => {
                    if term.memory.insert(token.clone()) {
                        fired = Some(build_activation(term, &token));
                    }
                }
                _ => {}
            }
        }
        for out in outputs {
            for child in self.arena.children_of(node_id) {
                tasks.push_back(Task::Token {
                    node: child,
                    token: out.clone(),
                });
            }
        }
        if let Some(activation) = fired {
            debug!(rule_id = %activation.rule_id, token = %activation.token, "rule fired");
            fires.push(activation);
        }
    }

    fn on_retract(&mut self, node_id: NodeId, id: InternalId, tasks: &mut VecDeque<Task>) {
        let mut forward = false;
        let mut notify = None;
        {
            let node = match self.arena.get_mut(node_id) {
                Some(n) => n,
                None => return,
            };
            match &mut node.kind {
                NodeKind::Root => forward = true,
                NodeKind::Type { type_name, memory } => {
                    if *type_name == id.type_name() && memory.remove(&id).is_some() {
                        forward = true;
                    }
                }
                NodeKind::Alpha(alpha) => {
                    if alpha.memory.remove(&id).is_some() {
                        forward = true;
                    }
                }
                NodeKind::Join(join) => {
                    let l = join.left.remove_fact(&id);
                    let r = join.right.remove_fact(&id);
                    let res = join.results.remove_fact(&id);
                    forward = !l.is_empty() || !r.is_empty() || !res.is_empty();
                }
                NodeKind::Terminal(term) => {
                    let removed = term.memory.remove_fact(&id);
                    if !removed.is_empty() {
                        notify = Some(term.rule_id.clone());
                    }
                }
            }
        }
        if forward {
            for child in self.arena.children_of(node_id) {
                tasks.push_back(Task::Retract {
                    node: child,
                    id: id.clone(),
                });
            }
        }
        if let Some(rule_id) = notify {
            if let Some(executor) = self.executor.as_mut() {
                executor.on_retract(&rule_id, &id);
            }
        }
    }

    /// Replay a parent node's current output into one child.
    fn replay_edge(&mut self, parent: NodeId, child: NodeId, tasks: &mut VecDeque<Task>) {
        if parent == self.root {
            for fact in self.facts.iter() {
                tasks.push_back(Task::Fact {
                    node: child,
                    fact: fact.clone(),
                });
            }
            return;
        }
        let Some(node) = self.arena.get(parent) else {
            return;
        };
        match &node.kind {
            NodeKind::Type { memory, .. } => {
                for fact in memory.iter() {
                    tasks.push_back(Task::Fact {
                        node: child,
                        fact: fact.clone(),
                    });
                }
            }
            NodeKind::Alpha(alpha) => {
                if alpha.passthrough_for.is_some() {
                    for fact in alpha.memory.iter() {
                        tasks.push_back(Task::Token {
                            node: child,
                            token: Token::of(&alpha.var, fact.clone()),
                        });
                    }
                } else {
                    for fact in alpha.memory.iter() {
                        tasks.push_back(Task::Fact {
                            node: child,
                            fact: fact.clone(),
                        });
                    }
                }
            }
            NodeKind::Join(join) => {
                for token in join.results.iter() {
                    tasks.push_back(Task::Token {
                        node: child,
                        token: token.clone(),
                    });
                }
            }
            NodeKind::Root | NodeKind::Terminal(_) => {}
        }
    }

    // ========================================================================
    // INTROSPECTION AND RESET
    // ========================================================================

    pub fn sharing_stats(&self) -> SharingStats {
        self.registry.stats.clone()
    }

    /// Reference count and referencing rule ids for the node with the
    /// given registry key.
    pub fn node_lifecycle(&self, key: &str) -> Option<(usize, Vec<String>)> {
        self.arena
            .iter()
            .find(|n| n.key == key)
            .map(|n| (n.ref_count(), n.rule_ids().to_vec()))
    }

    /// Flat numeric snapshot of the network for dashboards and logs.
    pub fn network_stats(&self) -> IndexMap<String, f64> {
        let mut shared_alphas = 0u64;
        let mut rule_references = 0u64;
        let mut filter_alphas = 0u64;
        let mut chains = 0u64;
        let mut type_nodes = 0u64;
        let mut beta_nodes = 0u64;
        let mut terminal_nodes = 0u64;
        for node in self.arena.iter() {
            match &node.kind {
                NodeKind::Alpha(a) => {
                    if a.passthrough_for.is_some() {
                        chains += 1;
                    } else {
                        filter_alphas += 1;
                        rule_references += node.ref_count() as u64;
                        if node.ref_count() > 1 {
                            shared_alphas += 1;
                        }
                    }
                }
                NodeKind::Type { .. } => type_nodes += 1,
                NodeKind::Join(_) => beta_nodes += 1,
                NodeKind::Terminal(_) => terminal_nodes += 1,
                NodeKind::Root => {}
            }
        }
        let ratio = if filter_alphas == 0 {
            0.0
        } else {
            rule_references as f64 / filter_alphas as f64
        };
        let stats = &self.registry.stats;
        let mut out = IndexMap::new();
        out.insert("fact_count".to_string(), self.facts.len() as f64);
        out.insert("rule_count".to_string(), self.rules.len() as f64);
        out.insert("type_nodes".to_string(), type_nodes as f64);
        out.insert("alpha_nodes".to_string(), filter_alphas as f64);
        out.insert("beta_nodes".to_string(), beta_nodes as f64);
        out.insert("terminal_nodes".to_string(), terminal_nodes as f64);
        out.insert(
            "lifecycle_total_nodes".to_string(),
            self.arena.live_count() as f64,
        );
        out.insert("active_chains".to_string(), chains as f64);
        out.insert(
            "sharing_total_shared_alpha_nodes".to_string(),
            shared_alphas as f64,
        );
        out.insert(
            "sharing_total_rule_references".to_string(),
            rule_references as f64,
        );
        out.insert("sharing_average_sharing_ratio".to_string(), ratio);
        out.insert(
            "sharing_alpha_nodes_created".to_string(),
            stats.alpha_nodes_created as f64,
        );
        out.insert(
            "sharing_alpha_nodes_reused".to_string(),
            stats.alpha_nodes_reused as f64,
        );
        out.insert(
            "sharing_beta_nodes_created".to_string(),
            stats.beta_nodes_created as f64,
        );
        out.insert(
            "sharing_beta_nodes_reused".to_string(),
            stats.beta_nodes_reused as f64,
        );
        out.insert("prefix_cache_hits".to_string(), stats.prefix_hits as f64);
        out.insert(
            "prefix_cache_misses".to_string(),
            stats.prefix_misses as f64,
        );
        out.insert(
            "beta_hash_cache_entries".to_string(),
            self.hash_cache.len() as f64,
        );
        out.insert(
            "beta_hash_cache_hits".to_string(),
            self.hash_cache.hits as f64,
        );
        out.insert(
            "beta_hash_cache_misses".to_string(),
            self.hash_cache.misses as f64,
        );
        out
    }

    pub fn node_count(&self) -> usize {
        self.arena.live_count()
    }

    pub fn config(&self) -> &ReteConfig {
        &self.config
    }

    /// Drain activations recorded since the last call. Useful when no
    /// executor is installed.
    pub fn take_activations(&mut self) -> Vec<Activation> {
        std::mem::take(&mut self.activations)
    }

    /// Clear every memory but keep types, rules, and network structure.
    pub fn clear_memories(&mut self) {
        self.facts.clear();
        for node in self.arena.iter_mut() {
            match &mut node.kind {
                NodeKind::Type { memory, .. } => memory.clear(),
                NodeKind::Alpha(a) => a.memory.clear(),
                NodeKind::Join(j) => {
                    j.left.clear();
                    j.right.clear();
                    j.results.clear();
                }
                NodeKind::Terminal(t) => t.memory.clear(),
                NodeKind::Root => {}
            }
        }
        self.activations.clear();
    }

    /// Tear everything down, including the type catalog.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        let executor = self.executor.take();
        *self = Network::new(config);
        self.executor = executor;
    }

    /// Tear down rules and facts but keep declared types.
    pub fn reset_keep_types(&mut self) {
        let types: Vec<TypeDefinition> = self.types.values().cloned().collect();
        self.reset();
        for def in types {
            // Re-adding a type we just removed cannot collide.
            let _ = self.add_type(def);
        }
    }
}

impl Default for Network {
    fn default() -> Network {
        Network::new(ReteConfig::default())
    }
}

/// Run one token through a join node, returning the produced result
/// tokens.
fn join_token(join: &mut JoinData, token: Token) -> Vec<Token> {
    let side = side_for(join, &token);
    let (own, opposite) = match side {
        Some(crate::node::JoinSide::Left) => (&mut join.left, &join.right),
        Some(crate::node::JoinSide::Right) => (&mut join.right, &join.left),
        None => return Vec::new(),
    };
    if !own.insert(token.clone()) {
        return Vec::new();
    }
    let mut produced = Vec::new();
    for other in opposite.iter() {
        if !token.compatible(other) {
            continue;
        }
        let mut merged = token.merge(other);
        let temps = match join_test(join, &merged) {
            Some(t) => t,
            None => continue,
        };
        // Passing tokens carry the executed step results downstream.
        merged.results = temps;
        produced.push(merged);
    }
    let mut out = Vec::new();
    for merged in produced {
        if join.results.insert(merged.clone()) {
            out.push(merged);
        }
    }
    out
}

/// Decide which side of the join a token feeds, by its variable set.
fn side_for(join: &JoinData, token: &Token) -> Option<crate::node::JoinSide> {
    let mut vars: Vec<&str> = token.bindings.keys().map(String::as_str).collect();
    vars.sort_unstable();
    let mut left: Vec<&str> = join.signature.left_vars.iter().map(String::as_str).collect();
    left.sort_unstable();
    if vars == left {
        return Some(crate::node::JoinSide::Left);
    }
    let mut right: Vec<&str> = join
        .signature
        .right_vars
        .iter()
        .map(String::as_str)
        .collect();
    right.sort_unstable();
    if vars == right {
        return Some(crate::node::JoinSide::Right);
    }
    None
}

/// Run the join's test against a merged token. Returns the step results
/// the passing token should carry, `None` when the test fails.
fn join_test(join: &JoinData, merged: &Token) -> Option<HashMap<String, Value>> {
    match &join.decomposition {
        Some(decomp) => {
            let temps = decomp.execute(merged);
            eval_bool(&decomp.rewritten, merged, &temps).then_some(temps)
        }
        None => eval_bool(&join.signature.condition, merged, &merged.results)
            .then(|| merged.results.clone()),
    }
}

fn build_activation(term: &TerminalData, token: &Token) -> Activation {
    let actions = term
        .actions
        .iter()
        .map(|call: &ActionCall| ResolvedAction {
            job: call.job.clone(),
            args: call
                .args
                .iter()
                .map(|arg| {
                    eval_value(arg, token, &token.results).unwrap_or_else(|| {
                        // Argument positions are stable even when a value
                        // cannot be produced.
                        warn!(job = %call.job, "action argument did not resolve");
                        Value::Str(String::new())
                    })
                })
                .collect(),
        })
        .collect();
    Activation {
        rule_id: term.rule_id.clone(),
        rule_name: term.rule_name.clone(),
        token: token.clone(),
        actions,
    }
}
