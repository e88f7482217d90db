//! Transactional submission: verification, rollback, metrics.

mod generators;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use generators::*;
use tsd_rete::error::ReteError;
use tsd_rete::fact::InternalId;
use tsd_rete::metrics::HealthStatus;
use tsd_rete::storage::{FactStorage, MemoryStorage};
use tsd_rete::txn::Coordinator;
use tsd_rete::{Fact, ReteConfig};

fn fast_config() -> ReteConfig {
    ReteConfig {
        submission_timeout: Duration::from_secs(2),
        verify_retry_delay: Duration::from_millis(1),
        verify_retry_max_delay: Duration::from_millis(5),
        max_verify_retries: 5,
        ..ReteConfig::default()
    }
}

/// Storage whose reads fail a fixed number of times before succeeding,
/// imitating replication lag.
struct LaggyStorage {
    inner: MemoryStorage,
    misses_left: AtomicU32,
}

impl LaggyStorage {
    fn new(misses: u32) -> LaggyStorage {
        LaggyStorage {
            inner: MemoryStorage::new(),
            misses_left: AtomicU32::new(misses),
        }
    }
}

impl FactStorage for LaggyStorage {
    fn get_fact(&self, id: &InternalId) -> Option<Arc<Fact>> {
        let left = self.misses_left.load(Ordering::SeqCst);
        if left > 0 {
            self.misses_left.store(left - 1, Ordering::SeqCst);
            return None;
        }
        self.inner.get_fact(id)
    }

    fn put_fact(&self, fact: Arc<Fact>) -> Result<(), ReteError> {
        self.inner.put_fact(fact)
    }

    fn delete_fact(&self, id: &InternalId) -> bool {
        self.inner.delete_fact(id)
    }

    fn all_facts(&self) -> Vec<Arc<Fact>> {
        self.inner.all_facts()
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// Storage that never acknowledges reads.
struct BlackHoleStorage;

impl FactStorage for BlackHoleStorage {
    fn get_fact(&self, _id: &InternalId) -> Option<Arc<Fact>> {
        None
    }

    fn put_fact(&self, _fact: Arc<Fact>) -> Result<(), ReteError> {
        Ok(())
    }

    fn delete_fact(&self, _id: &InternalId) -> bool {
        false
    }

    fn all_facts(&self) -> Vec<Arc<Fact>> {
        Vec::new()
    }

    fn clear(&self) {}
}

#[test]
fn commit_asserts_and_verifies() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let coord = Coordinator::new(storage.clone(), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    tx.assert(order("o1", "alice", 50));
    let report = coord.commit(&mut net, tx).unwrap();

    assert_eq!(report.facts_committed, 2);
    assert_eq!(report.verify_retries, 0);
    assert_eq!(storage.len(), 2);
    assert_eq!(net.matches_for_rule("adult").len(), 1);

    let m = coord.metrics();
    assert_eq!(m.transactions_committed, 1);
    // Each fact is read back once during apply and once more at commit.
    assert_eq!(m.verify_attempts, 4);
    assert!(m.total_apply_duration > Duration::ZERO);
    assert_eq!(m.health(), HealthStatus::Healthy);
}

#[test]
fn duplicate_facts_are_skipped_without_aborting_the_batch() {
    let mut net = network_with_types();
    let storage = Arc::new(MemoryStorage::new());
    let coord = Coordinator::new(storage.clone(), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    coord.commit(&mut net, tx).unwrap();

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    tx.assert(person("bob", "bob", 40));
    coord.commit(&mut net, tx).unwrap();

    assert_eq!(net.fact_count(), 2);
    assert_eq!(storage.len(), 2);
}

#[test]
fn fact_already_persisted_is_skipped_and_undone_in_the_network() {
    let mut net = network_with_types();
    let storage = Arc::new(MemoryStorage::new());
    storage.put_fact(person("alice", "alice", 30)).unwrap();
    let coord = Coordinator::new(storage.clone(), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    tx.assert(person("bob", "bob", 40));
    coord.commit(&mut net, tx).unwrap();

    // Alice was already durable; only bob entered the network.
    assert_eq!(net.fact_count(), 1);
    assert_eq!(storage.len(), 2);
}

#[test]
fn submit_fact_asserts_persists_and_verifies() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let coord = Coordinator::new(storage.clone(), fast_config());

    coord
        .submit_fact(&mut net, person("alice", "alice", 30))
        .unwrap();

    assert_eq!(storage.len(), 1);
    assert_eq!(net.matches_for_rule("adult").len(), 1);
    assert_eq!(coord.metrics().transactions_committed, 1);
}

#[test]
fn verification_retries_through_lag() {
    let mut net = network_with_types();
    let coord = Coordinator::new(Arc::new(LaggyStorage::new(2)), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    let report = coord.commit(&mut net, tx).unwrap();

    assert_eq!(report.verify_retries, 2);
    assert!(net.contains_fact(&person("alice", "alice", 30).internal_id()));
    let m = coord.metrics();
    assert_eq!(m.total_verify_retries, 2);
    // Three polls while the lag drained, one clean re-check at commit.
    assert_eq!(m.verify_attempts, 4);
}

#[test]
fn verification_timeout_rolls_everything_back() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    let coord = Coordinator::new(Arc::new(BlackHoleStorage), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    let err = coord.commit(&mut net, tx).unwrap_err();
    assert!(matches!(err, ReteError::VerifyTimeout { .. }));

    // The fact left the network again and the match with it.
    assert!(!net.contains_fact(&person("alice", "alice", 30).internal_id()));
    assert!(net.matches_for_rule("adult").is_empty());

    let m = coord.metrics();
    assert_eq!(m.transactions_rolled_back, 1);
    assert_eq!(m.verification_timeouts, 1);
    assert_eq!(m.rollback_reasons.len(), 1);
    assert_eq!(m.health(), HealthStatus::Degraded);
}

#[test]
fn transactions_carry_retractions() {
    let mut net = network_with_types();
    net.add_rule(adult_rule("adult")).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let coord = Coordinator::new(storage.clone(), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    coord.commit(&mut net, tx).unwrap();

    let id = person("alice", "alice", 30).internal_id();
    let mut tx = coord.begin();
    tx.retract(id.clone());
    let report = coord.commit(&mut net, tx).unwrap();

    assert_eq!(report.facts_retracted, 1);
    assert!(storage.get_fact(&id).is_none());
    assert!(!net.contains_fact(&id));
}

#[test]
fn commit_reverification_can_be_skipped() {
    let mut net = network_with_types();
    let config = ReteConfig {
        verify_on_commit: false,
        ..fast_config()
    };
    let coord = Coordinator::new(Arc::new(MemoryStorage::new()), config);

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    coord.commit(&mut net, tx).unwrap();

    // The per-fact check during apply still ran, exactly once.
    assert_eq!(coord.metrics().verify_attempts, 1);
    assert!(net.contains_fact(&person("alice", "alice", 30).internal_id()));
}

#[test]
fn unverifiable_writes_fail_even_without_commit_reverification() {
    let mut net = network_with_types();
    let config = ReteConfig {
        verify_on_commit: false,
        ..fast_config()
    };
    let coord = Coordinator::new(Arc::new(BlackHoleStorage), config);

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    let err = coord.commit(&mut net, tx).unwrap_err();
    assert!(matches!(err, ReteError::VerifyTimeout { .. }));
    assert!(!net.contains_fact(&person("alice", "alice", 30).internal_id()));
}

#[test]
fn invalid_fact_aborts_and_rolls_back_earlier_facts() {
    let mut net = network_with_types();
    let storage = Arc::new(MemoryStorage::new());
    let coord = Coordinator::new(storage.clone(), fast_config());

    let mut tx = coord.begin();
    tx.assert(person("alice", "alice", 30));
    tx.assert(Fact::new("Ghost", "g1", vec![]));
    let err = coord.commit(&mut net, tx).unwrap_err();
    assert!(matches!(err, ReteError::UnknownType(_)));

    assert!(!net.contains_fact(&person("alice", "alice", 30).internal_id()));
    assert!(storage.is_empty());
}

#[test]
fn metrics_degrade_under_repeated_failures() {
    let mut net = network_with_types();
    let coord = Coordinator::new(Arc::new(BlackHoleStorage), fast_config());
    for i in 0..3 {
        let mut tx = coord.begin();
        tx.assert(person(&format!("p{i}"), "x", 30));
        let _ = coord.commit(&mut net, tx);
    }
    let m = coord.metrics();
    assert_eq!(m.transactions_started, 3);
    assert_eq!(m.transactions_rolled_back, 3);
    assert!(m.success_rate() < 0.95);
    assert_eq!(m.health(), HealthStatus::Degraded);
}
