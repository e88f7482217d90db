//! Fact storage behind the network.
//!
//! The engine does not own durable state; it consults a `FactStorage`
//! implementation when a transaction verifies that submitted facts became
//! visible. The in-memory implementation backs tests and single-process
//! deployments; it keeps an append-only log of every mutation so a
//! durable backend can be replayed from it. Implementations must be
//! shareable across threads since the transaction coordinator polls from
//! its caller's thread while the network may assert concurrently.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ReteError;
use crate::fact::{Fact, InternalId};

/// Format version written into snapshots.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    facts: Vec<Fact>,
}

/// One entry in the mutation log.
#[derive(Clone, Debug)]
pub enum LogEntry {
    Put(Arc<Fact>),
    Delete(InternalId),
}

/// Visibility oracle for submitted facts.
pub trait FactStorage: Send + Sync {
    /// Fetch a fact by internal identity, or `None` if not yet visible.
    fn get_fact(&self, id: &InternalId) -> Option<Arc<Fact>>;

    /// Store a fact under its internal identity. Storing an identity
    /// that already exists is a [`ReteError::DuplicateFact`].
    fn put_fact(&self, fact: Arc<Fact>) -> Result<(), ReteError>;

    /// Remove a fact. Returns whether the identity was present.
    fn delete_fact(&self, id: &InternalId) -> bool;

    /// Flush buffered writes. In-memory backends have nothing to flush.
    fn sync(&self) {}

    /// Snapshot of every visible fact.
    fn all_facts(&self) -> Vec<Arc<Fact>>;

    fn facts_of_type(&self, type_name: &str) -> Vec<Arc<Fact>> {
        self.all_facts()
            .into_iter()
            .filter(|f| f.type_name == type_name)
            .collect()
    }

    fn len(&self) -> usize {
        self.all_facts().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Process-local storage keyed by internal identity.
#[derive(Default)]
pub struct MemoryStorage {
    facts: RwLock<HashMap<InternalId, Arc<Fact>>>,
    log: RwLock<Vec<LogEntry>>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    /// The mutation log since construction or the last `clear`.
    pub fn log(&self) -> Vec<LogEntry> {
        self.log.read().map(|g| g.clone()).unwrap_or_default()
    }

    /// Serialize the current facts as a versioned JSON snapshot.
    pub fn snapshot(&self) -> Result<String, ReteError> {
        let facts: Vec<Fact> = self.all_facts().iter().map(|f| (**f).clone()).collect();
        serde_json::to_string(&Snapshot {
            version: SNAPSHOT_VERSION,
            facts,
        })
        .map_err(|e| ReteError::Storage(format!("snapshot serialization failed: {e}")))
    }

    /// Replace the current contents with a snapshot produced by
    /// [`MemoryStorage::snapshot`]. The mutation log restarts with the
    /// restored facts.
    pub fn restore(&self, source: &str) -> Result<(), ReteError> {
        let snap: Snapshot = serde_json::from_str(source)
            .map_err(|e| ReteError::Storage(format!("malformed snapshot: {e}")))?;
        if snap.version != SNAPSHOT_VERSION {
            return Err(ReteError::Storage(format!(
                "unsupported snapshot version {}",
                snap.version
            )));
        }
        self.clear();
        for fact in snap.facts {
            self.put_fact(Arc::new(fact))?;
        }
        Ok(())
    }
}

impl FactStorage for MemoryStorage {
    fn get_fact(&self, id: &InternalId) -> Option<Arc<Fact>> {
        self.facts.read().ok()?.get(id).cloned()
    }

    fn put_fact(&self, fact: Arc<Fact>) -> Result<(), ReteError> {
        let id = fact.internal_id();
        if let Ok(mut g) = self.facts.write() {
            if g.contains_key(&id) {
                return Err(ReteError::DuplicateFact(id.to_string()));
            }
            g.insert(id, fact.clone());
        }
        if let Ok(mut log) = self.log.write() {
            log.push(LogEntry::Put(fact));
        }
        Ok(())
    }

    fn delete_fact(&self, id: &InternalId) -> bool {
        let removed = self
            .facts
            .write()
            .map(|mut g| g.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            if let Ok(mut log) = self.log.write() {
                log.push(LogEntry::Delete(id.clone()));
            }
        }
        removed
    }

    fn all_facts(&self) -> Vec<Arc<Fact>> {
        self.facts
            .read()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.facts.read().map(|g| g.len()).unwrap_or(0)
    }

    fn clear(&self) {
        if let Ok(mut g) = self.facts.write() {
            g.clear();
        }
        if let Ok(mut log) = self.log.write() {
            log.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn put_get_delete() {
        let store = MemoryStorage::new();
        let f = Fact::new("Person", "a", vec![("age", Value::from(30i64))]);
        let id = f.internal_id();
        assert!(store.get_fact(&id).is_none());
        store.put_fact(f).unwrap();
        assert!(store.get_fact(&id).is_some());
        assert!(store.delete_fact(&id));
        assert!(store.get_fact(&id).is_none());
        assert_eq!(store.log().len(), 2);
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let store = MemoryStorage::new();
        let f = Fact::new("Person", "a", vec![("age", Value::from(30i64))]);
        store.put_fact(f.clone()).unwrap();
        let err = store.put_fact(f).unwrap_err();
        assert!(matches!(err, ReteError::DuplicateFact(_)));
        assert_eq!(store.len(), 1);
        // The rejected write never reaches the log.
        assert_eq!(store.log().len(), 1);
    }

    #[test]
    fn deleting_an_absent_fact_reports_false() {
        let store = MemoryStorage::new();
        let id = InternalId::new("Person", "ghost");
        assert!(!store.delete_fact(&id));
        assert!(store.log().is_empty());
    }

    #[test]
    fn snapshot_restores_facts() {
        let store = MemoryStorage::new();
        store
            .put_fact(Fact::new(
                "Person",
                "a",
                vec![("age", Value::from(30i64)), ("name", Value::from("ann"))],
            ))
            .unwrap();
        let snap = store.snapshot().unwrap();
        assert!(snap.contains("\"version\":1"));

        let restored = MemoryStorage::new();
        restored.restore(&snap).unwrap();
        let id = InternalId::new("Person", "a");
        let fact = restored.get_fact(&id).unwrap();
        assert_eq!(fact.get("age"), Some(&Value::from(30i64)));

        assert!(restored.restore("{\"version\":9,\"facts\":[]}").is_err());
    }

    #[test]
    fn type_filtered_snapshot() {
        let store = MemoryStorage::new();
        store.put_fact(Fact::new("Person", "a", vec![])).unwrap();
        store.put_fact(Fact::new("Order", "b", vec![])).unwrap();
        assert_eq!(store.facts_of_type("Person").len(), 1);
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
        assert!(store.log().is_empty());
    }
}
