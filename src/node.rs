//! Network nodes and the arena that owns them.
//!
//! Nodes live in a slab indexed by `NodeId`; edges are child id lists, so
//! the graph is traversed without reference cycles and removal reclaims
//! slots through a free list. Every node also carries a stable string key
//! (type name, alpha hash, `beta_` hash, terminal rule id) used by the
//! sharing registries, which survive arena slot reuse.
//!
//! Node kinds:
//! - `Root` fans incoming facts out to type nodes.
//! - `Type` admits facts of one declared type.
//! - `Alpha` filters single facts. Filter alphas are shared across rules;
//!   passthrough alphas are per rule and wrap each admitted fact into a
//!   one-variable token for their join.
//! - `Join` merges token streams from two parents under a test condition.
//! - `Terminal` collects complete matches for one rule and fires actions.

use crate::ast::{ActionCall, Condition};
use crate::decompose::Decomposition;
use crate::hash::JoinSignature;
use crate::memory::{FactMemory, TokenMemory};

pub type NodeId = usize;

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    /// Stable registry key, unique per live node.
    pub key: String,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    /// Ids of the rules whose network reaches through this node.
    rules: Vec<String>,
}

#[derive(Debug)]
pub enum NodeKind {
    Root,
    Type {
        type_name: String,
        memory: FactMemory,
    },
    Alpha(AlphaData),
    Join(JoinData),
    Terminal(TerminalData),
}

#[derive(Debug)]
pub struct AlphaData {
    /// Filter condition, variable-normalized for shared filters.
    pub condition: Condition,
    /// Variable the node binds facts under. Shared filter alphas use the
    /// normalized placeholder; passthroughs use the rule's variable.
    pub var: String,
    pub memory: FactMemory,
    /// Set on the final node of an arithmetic filter chain; the rewritten
    /// comparison consumes the executed step results.
    pub decomposition: Option<Decomposition>,
    /// Set on per-rule passthrough nodes: (rule id, join side).
    pub passthrough_for: Option<PassthroughTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassthroughTag {
    pub rule_id: String,
    /// Side of the join the passthrough feeds. `None` when a
    /// single-variable rule wires it straight to the terminal.
    pub side: Option<JoinSide>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

#[derive(Debug)]
pub struct JoinData {
    pub signature: JoinSignature,
    /// Present when the join condition contains arithmetic.
    pub decomposition: Option<Decomposition>,
    pub left_parent: NodeId,
    pub right_parent: NodeId,
    pub left: TokenMemory,
    pub right: TokenMemory,
    pub results: TokenMemory,
}

#[derive(Debug)]
pub struct TerminalData {
    pub rule_id: String,
    pub rule_name: String,
    pub actions: Vec<ActionCall>,
    pub memory: TokenMemory,
}

impl Node {
    /// Record a rule as reaching through this node. Idempotent: a rule
    /// whose build touches the node twice is still counted once.
    /// Returns whether the rule was newly recorded.
    pub fn add_rule_ref(&mut self, rule_id: &str) -> bool {
        if self.rules.iter().any(|r| r == rule_id) {
            return false;
        }
        self.rules.push(rule_id.to_string());
        true
    }

    /// Drop a rule's reference. Returns whether this call removed the
    /// last reference, making the node eligible for teardown.
    pub fn remove_rule_ref(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r != rule_id);
        self.rules.len() < before && self.rules.is_empty()
    }

    /// Number of rules referencing this node.
    pub fn ref_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule_ids(&self) -> &[String] {
        &self.rules
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(
            &self.kind,
            NodeKind::Alpha(AlphaData {
                passthrough_for: Some(_),
                ..
            })
        )
    }

    pub fn as_join(&self) -> Option<&JoinData> {
        match &self.kind {
            NodeKind::Join(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_join_mut(&mut self) -> Option<&mut JoinData> {
        match &mut self.kind {
            NodeKind::Join(j) => Some(j),
            _ => None,
        }
    }
}

/// Slab of nodes with slot reuse.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl NodeArena {
    pub fn new() -> NodeArena {
        NodeArena::default()
    }

    pub fn alloc(&mut self, key: String, kind: NodeKind) -> NodeId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[id] = Some(Node {
            id,
            key,
            kind,
            children: Vec::new(),
            rules: Vec::new(),
        });
        id
    }

    pub fn free(&mut self, id: NodeId) -> Option<Node> {
        let node = self.slots.get_mut(id)?.take();
        if node.is_some() {
            self.free.push(id);
        }
        node
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id)?.as_mut()
    }

    /// Returns true when the edge was newly added.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        match self.get_mut(parent) {
            Some(node) if !node.children.contains(&child) => {
                node.children.push(child);
                true
            }
            _ => false,
        }
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.get_mut(parent) {
            node.children.retain(|&c| c != child);
        }
    }

    /// Children copied out, so callers can walk while mutating nodes.
    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}
