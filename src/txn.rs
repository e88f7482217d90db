//! Transactional fact submission with visibility verification.
//!
//! Facts asserted through a transaction are written to storage and
//! propagated through the network together. Each fact is verified as it
//! is applied: the coordinator polls storage until the written fact
//! reads back, with exponential backoff between polls. With
//! `verify_on_commit` set the whole batch is re-checked once more after
//! the final sync. A fact that never becomes visible within its share
//! of the budget aborts the transaction: everything the transaction
//! touched is retracted from the network and deleted from storage, and
//! the caller gets the timeout error.
//!
//! The per-fact deadline is the total submission timeout divided across
//! the transaction's facts, floored at one second so large transactions
//! do not starve individual verifications.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ReteConfig;
use crate::error::ReteError;
use crate::fact::{Fact, InternalId};
use crate::metrics::CoherenceMetrics;
use crate::network::Network;
use crate::storage::FactStorage;

/// A batch of assertions and retractions committed atomically.
#[derive(Default)]
pub struct Transaction {
    asserts: Vec<Arc<Fact>>,
    retracts: Vec<InternalId>,
}

impl Transaction {
    pub fn assert(&mut self, fact: Arc<Fact>) {
        self.asserts.push(fact);
    }

    pub fn retract(&mut self, id: InternalId) {
        self.retracts.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.asserts.is_empty() && self.retracts.is_empty()
    }
}

/// Outcome of a successful commit.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitReport {
    pub facts_committed: usize,
    pub facts_retracted: usize,
    pub verify_retries: u64,
    pub duration: Duration,
}

/// Coordinates commits against one storage backend.
pub struct Coordinator {
    storage: Arc<dyn FactStorage>,
    config: ReteConfig,
    metrics: Mutex<CoherenceMetrics>,
}

impl Coordinator {
    pub fn new(storage: Arc<dyn FactStorage>, config: ReteConfig) -> Coordinator {
        Coordinator {
            storage,
            config,
            metrics: Mutex::new(CoherenceMetrics::new()),
        }
    }

    pub fn begin(&self) -> Transaction {
        if let Ok(mut m) = self.metrics.lock() {
            m.transactions_started += 1;
        }
        Transaction::default()
    }

    pub fn metrics(&self) -> CoherenceMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Submit a single fact outside a transaction: assert it into the
    /// network, persist it, then poll until it reads back. The network
    /// side is undone if persistence or verification fails.
    pub fn submit_fact(&self, net: &mut Network, fact: Arc<Fact>) -> Result<(), ReteError> {
        let mut tx = self.begin();
        tx.assert(fact);
        self.commit(net, tx).map(|_| ())
    }

    /// Apply and verify a transaction. Each fact is verified against
    /// storage as it is applied; `verify_on_commit` additionally
    /// re-checks the whole batch after the final sync. On failure the
    /// whole transaction is rolled back before the error is returned.
    pub fn commit(&self, net: &mut Network, tx: Transaction) -> Result<CommitReport, ReteError> {
        let started = Instant::now();
        let mut applied: Vec<InternalId> = Vec::new();
        let mut stats = ApplyStats::default();

        let outcome = self.apply(net, &tx, &mut applied, &mut stats);
        stats.apply = started.elapsed();
        let result = match outcome {
            Ok(()) if self.config.verify_on_commit && !applied.is_empty() => {
                self.storage.sync();
                let budget = per_fact_budget(&self.config, applied.len());
                let mut failure = None;
                for id in &applied {
                    match self.verify(id, budget) {
                        Ok(r) => {
                            stats.retries += r;
                            stats.polls += r + 1;
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure.map_or(Ok(()), Err)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                if let Ok(mut m) = self.metrics.lock() {
                    m.transactions_committed += 1;
                    self.record(&mut m, &stats);
                    m.total_verify_duration += started.elapsed();
                }
                Ok(CommitReport {
                    facts_committed: tx.asserts.len(),
                    facts_retracted: tx.retracts.len(),
                    verify_retries: stats.retries,
                    duration: started.elapsed(),
                })
            }
            Err(err) => {
                warn!(error = %err, "transaction failed, rolling back");
                self.rollback(net, &applied);
                if let Ok(mut m) = self.metrics.lock() {
                    m.transactions_rolled_back += 1;
                    self.record(&mut m, &stats);
                    m.rollback_reasons.push(err.to_string());
                    if matches!(err, ReteError::VerifyTimeout { .. }) {
                        m.verification_timeouts += 1;
                    }
                }
                Err(err)
            }
        }
    }

    fn record(&self, m: &mut CoherenceMetrics, stats: &ApplyStats) {
        m.total_verify_retries += stats.retries;
        m.verify_attempts += stats.polls;
        m.total_persist_duration += stats.persist;
        m.total_apply_duration += stats.apply;
    }

    fn apply(
        &self,
        net: &mut Network,
        tx: &Transaction,
        applied: &mut Vec<InternalId>,
        stats: &mut ApplyStats,
    ) -> Result<(), ReteError> {
        let budget = per_fact_budget(&self.config, tx.asserts.len());
        for fact in &tx.asserts {
            // Network validation runs first so a rejected fact never
            // reaches storage.
            match net.assert_fact(fact.clone()) {
                Ok(()) => {}
                Err(ReteError::DuplicateFact(id)) => {
                    // A duplicate is rejected on its own; the rest of the
                    // batch still applies.
                    warn!(fact = %id, "duplicate fact skipped");
                    continue;
                }
                Err(e) => return Err(e),
            }
            let id = fact.internal_id();
            let persist_started = Instant::now();
            match self.storage.put_fact(fact.clone()) {
                Ok(()) => {}
                Err(ReteError::DuplicateFact(dup)) => {
                    // Storage saw this identity before the network did;
                    // undo the network side and keep going.
                    let _ = net.retract_fact(&id);
                    warn!(fact = %dup, "duplicate fact skipped");
                    continue;
                }
                Err(e) => {
                    let _ = net.retract_fact(&id);
                    return Err(e);
                }
            }
            stats.persist += persist_started.elapsed();
            applied.push(id.clone());
            // Coherence check: the fact must read back before the next
            // one is applied.
            let retries = self.verify(&id, budget)?;
            stats.retries += retries;
            stats.polls += retries + 1;
        }
        for id in &tx.retracts {
            self.storage.delete_fact(id);
            net.retract_fact(id)?;
        }
        Ok(())
    }

    /// Poll storage until the fact reads back, doubling the delay per
    /// attempt up to the configured cap. Returns the retry count.
    fn verify(&self, id: &InternalId, budget: Duration) -> Result<u64, ReteError> {
        let deadline = Instant::now() + budget;
        let mut delay = self.config.verify_retry_delay;
        let mut attempts = 0u32;
        loop {
            if self.storage.get_fact(id).is_some() {
                debug!(fact = %id, attempts, "fact verified");
                return Ok(attempts as u64);
            }
            attempts += 1;
            if attempts > self.config.max_verify_retries || Instant::now() >= deadline {
                return Err(ReteError::VerifyTimeout {
                    fact_id: id.to_string(),
                    attempts,
                });
            }
            thread::sleep(delay.min(deadline.saturating_duration_since(Instant::now())));
            delay = (delay * 2).min(self.config.verify_retry_max_delay);
        }
    }

    fn rollback(&self, net: &mut Network, applied: &[InternalId]) {
        for id in applied.iter().rev() {
            self.storage.delete_fact(id);
            if net.contains_fact(id) {
                // A fact that failed validation never entered the network.
                let _ = net.retract_fact(id);
            }
        }
    }
}

/// Verification work accumulated over one commit.
#[derive(Default)]
struct ApplyStats {
    retries: u64,
    polls: u64,
    persist: Duration,
    apply: Duration,
}

/// Split the submission budget across facts, floored at one second.
fn per_fact_budget(config: &ReteConfig, fact_count: usize) -> Duration {
    let n = fact_count.max(1) as u32;
    let share = config.submission_timeout / n;
    share.max(Duration::from_secs(1))
}
