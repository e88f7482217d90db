//! Node memories.
//!
//! Every alpha node remembers the facts that passed it, and every join
//! node keeps three memories: left tokens, right tokens, and produced
//! results. Memories deduplicate on identity and support retraction by
//! fact identity, which removes every token the fact participates in.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::fact::{Fact, InternalId};
use crate::token::Token;

/// Fact store attached to alpha and type nodes.
#[derive(Debug, Default)]
pub struct FactMemory {
    facts: IndexMap<InternalId, Arc<Fact>>,
}

impl FactMemory {
    pub fn new() -> FactMemory {
        FactMemory::default()
    }

    /// Returns false if the fact was already present.
    pub fn insert(&mut self, fact: Arc<Fact>) -> bool {
        self.facts.insert(fact.internal_id(), fact).is_none()
    }

    pub fn remove(&mut self, id: &InternalId) -> Option<Arc<Fact>> {
        self.facts.shift_remove(id)
    }

    pub fn contains(&self, id: &InternalId) -> bool {
        self.facts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.facts.values()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
    }
}

/// Token store attached to each side of a join and to its results.
#[derive(Debug, Default)]
pub struct TokenMemory {
    tokens: IndexMap<String, Token>,
}

impl TokenMemory {
    pub fn new() -> TokenMemory {
        TokenMemory::default()
    }

    /// Returns false if an identical token was already present.
    pub fn insert(&mut self, token: Token) -> bool {
        let key = token.key();
        self.tokens.insert(key, token).is_none()
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.tokens.contains_key(&token.key())
    }

    /// Remove every token that binds the given fact identity; returns the
    /// removed tokens so retraction can cascade downstream.
    pub fn remove_fact(&mut self, id: &InternalId) -> Vec<Token> {
        let doomed: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, t)| t.contains_fact(id))
            .map(|(k, _)| k.clone())
            .collect();
        doomed
            .into_iter()
            .filter_map(|k| self.tokens.shift_remove(&k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn fact(t: &str, id: &str) -> Arc<Fact> {
        Fact::new(t, id, vec![("x", Value::from(1i64))])
    }

    #[test]
    fn fact_memory_deduplicates() {
        let mut mem = FactMemory::new();
        assert!(mem.insert(fact("Person", "a")));
        assert!(!mem.insert(fact("Person", "a")));
        assert_eq!(mem.len(), 1);
        assert!(mem.remove(&InternalId::new("Person", "a")).is_some());
        assert!(mem.is_empty());
    }

    #[test]
    fn retraction_removes_every_containing_token() {
        let mut mem = TokenMemory::new();
        let alice = fact("Person", "alice");
        let mut t1 = Token::of("p", alice.clone());
        t1.bindings.insert("o".to_string(), fact("Order", "1"));
        let mut t2 = Token::of("p", alice.clone());
        t2.bindings.insert("o".to_string(), fact("Order", "2"));
        let t3 = Token::of("q", fact("Person", "bob"));
        mem.insert(t1);
        mem.insert(t2);
        mem.insert(t3);
        let removed = mem.remove_fact(&InternalId::new("Person", "alice"));
        assert_eq!(removed.len(), 2);
        assert_eq!(mem.len(), 1);
    }
}
