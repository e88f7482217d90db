//! Thread-shared network handle.
//!
//! The network itself is single-writer: propagation mutates node
//! memories in place, so every entry point takes `&mut self` and the
//! borrow checker serializes callers within one thread. Sharing across
//! threads happens at this boundary instead: a [`SharedNetwork`] is a
//! cloneable handle over one mutex-guarded network, and every operation
//! holds the lock for its full wave so concurrent asserters observe
//! whole waves, never partial propagation.

use std::sync::{Arc, Mutex, PoisonError};

use crate::ast::{Rule, TypeDefinition};
use crate::error::ReteError;
use crate::fact::{Fact, InternalId};
use crate::network::Network;
use crate::token::Token;

/// A cloneable, thread-safe handle to a network.
#[derive(Clone, Default)]
pub struct SharedNetwork {
    inner: Arc<Mutex<Network>>,
}

impl SharedNetwork {
    pub fn new(net: Network) -> SharedNetwork {
        SharedNetwork {
            inner: Arc::new(Mutex::new(net)),
        }
    }

    /// Run a closure against the locked network. A poisoned lock is
    /// recovered rather than propagated: propagation never leaves the
    /// network in a torn state because each wave completes or the
    /// asserting call returns an error before mutating memories.
    pub fn with<R>(&self, f: impl FnOnce(&mut Network) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn add_type(&self, def: TypeDefinition) -> Result<(), ReteError> {
        self.with(|net| net.add_type(def))
    }

    pub fn add_rule(&self, rule: Rule) -> Result<(), ReteError> {
        self.with(|net| net.add_rule(rule))
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<(), ReteError> {
        self.with(|net| net.remove_rule(rule_id))
    }

    pub fn assert_fact(&self, fact: Arc<Fact>) -> Result<(), ReteError> {
        self.with(|net| net.assert_fact(fact))
    }

    pub fn retract_fact(&self, id: &InternalId) -> Result<(), ReteError> {
        self.with(|net| net.retract_fact(id))
    }

    pub fn matches_for_rule(&self, rule_id: &str) -> Vec<Token> {
        self.with(|net| net.matches_for_rule(rule_id))
    }

    pub fn fact_count(&self) -> usize {
        self.with(|net| net.fact_count())
    }

    pub fn contains_fact(&self, id: &InternalId) -> bool {
        self.with(|net| net.contains_fact(id))
    }
}
