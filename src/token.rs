//! Tokens: partial join results flowing through the beta network.
//!
//! A token maps variable names to fact handles. Joins merge tokens by
//! checking binding compatibility: a shared variable must be bound to the
//! same fact identity on both sides, and two tokens whose variable sets
//! are identical never merge (they are alternative bindings of the same
//! shape, not complementary halves).

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::fact::{Fact, InternalId};
use crate::value::Value;

/// A set of variable bindings accumulated along a join cascade.
#[derive(Clone, Debug, Default)]
pub struct Token {
    pub bindings: IndexMap<String, Arc<Fact>>,
    /// Decomposed arithmetic step results computed along the cascade,
    /// keyed by step name. A separate namespace from bindings; identity
    /// and compatibility look at bindings only.
    pub results: HashMap<String, Value>,
}

impl Token {
    pub fn new() -> Token {
        Token::default()
    }

    /// A single-variable token wrapping one fact.
    pub fn of(var: &str, fact: Arc<Fact>) -> Token {
        let mut bindings = IndexMap::new();
        bindings.insert(var.to_string(), fact);
        Token {
            bindings,
            results: HashMap::new(),
        }
    }

    /// All bound facts, in binding order.
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        self.bindings.values().cloned().collect()
    }

    pub fn get(&self, var: &str) -> Option<&Arc<Fact>> {
        self.bindings.get(var)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Whether this token binds the given fact identity to any variable.
    pub fn contains_fact(&self, id: &InternalId) -> bool {
        self.bindings.values().any(|f| f.internal_id() == *id)
    }

    /// Two tokens are compatible when every shared variable binds the same
    /// fact identity and at least one side contributes a new variable.
    pub fn compatible(&self, other: &Token) -> bool {
        let mut shared = 0usize;
        for (var, fact) in &self.bindings {
            if let Some(theirs) = other.bindings.get(var) {
                if theirs.internal_id() != fact.internal_id() {
                    return false;
                }
                shared += 1;
            }
        }
        // Identical variable sets are rival bindings, not join halves.
        shared < self.bindings.len() || shared < other.bindings.len()
    }

    /// Merge two compatible tokens. Left-side bindings win ordering; the
    /// caller is expected to have checked `compatible` first.
    pub fn merge(&self, other: &Token) -> Token {
        let mut bindings = self.bindings.clone();
        for (var, fact) in &other.bindings {
            bindings.entry(var.clone()).or_insert_with(|| fact.clone());
        }
        let mut results = self.results.clone();
        for (name, value) in &other.results {
            results
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        Token { bindings, results }
    }

    /// Stable identity for deduplication in memories: sorted
    /// `var=Type~id` pairs.
    pub fn key(&self) -> String {
        let mut parts: Vec<String> = self
            .bindings
            .iter()
            .map(|(var, fact)| format!("{}={}", var, fact.internal_id()))
            .collect();
        parts.sort();
        parts.join(",")
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Token) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (var, fact)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", var, fact.internal_id())?;
        }
        write!(f, "]")
    }
}
