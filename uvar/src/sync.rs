//! Barrier reconciliation between the local cache and the durable store.

use std::collections::BTreeMap;

use crate::store::{UvarEvent, UvarStore};

/// Local view of one universal variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UvarRecord {
    pub value: String,
    pub exported: bool,
}

/// Per-process universal-variable cache.
///
/// `get`/`set`/`remove` are synchronous against the local cache and never
/// block. Cross-process consistency happens only at [`barrier`], which flushes
/// pending local writes and replays the store's full history; last writer in
/// store order wins on conflicting names.
///
/// If the store ever fails (unreadable, corrupt, lock timeout) the
/// synchronizer warns once and runs session-local for the rest of the process.
///
/// [`barrier`]: UvarSynchronizer::barrier
pub struct UvarSynchronizer {
    store: Option<Box<dyn UvarStore>>,
    table: BTreeMap<String, UvarRecord>,
    pending: Vec<UvarEvent>,
    degraded: bool,
}

impl UvarSynchronizer {
    /// A synchronizer with no durable store: universal variables live and die
    /// with this process. Used by tests and embedders.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: None,
            table: BTreeMap::new(),
            pending: Vec::new(),
            degraded: false,
        }
    }

    #[must_use]
    pub fn with_store(store: impl UvarStore + 'static) -> Self {
        Self {
            store: Some(Box::new(store)),
            table: BTreeMap::new(),
            pending: Vec::new(),
            degraded: false,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UvarRecord> {
        self.table.get(name)
    }

    pub fn set(&mut self, name: &str, value: String, exported: bool) {
        self.table.insert(
            name.to_string(),
            UvarRecord {
                value: value.clone(),
                exported,
            },
        );
        self.pending.push(UvarEvent::Set {
            name: name.to_string(),
            value,
            exported,
        });
    }

    /// Returns whether the variable existed in the local cache.
    pub fn remove(&mut self, name: &str) -> bool {
        let existed = self.table.remove(name).is_some();
        self.pending.push(UvarEvent::Erase {
            name: name.to_string(),
        });
        existed
    }

    /// All names in the local cache, in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UvarRecord)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True once the durable store has been abandoned for this session.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Flushes pending local writes and merges remote ones.
    ///
    /// Returns the names whose resolved value or export flag changed as a
    /// result — i.e. remote updates this process had not yet observed. The
    /// caller uses this to invalidate derived views such as the export array.
    ///
    /// On store failure the local cache is left exactly as it was: pending
    /// writes were already applied locally when they were made, and no partial
    /// remote merge is ever visible.
    pub fn barrier(&mut self) -> Vec<String> {
        let pending = std::mem::take(&mut self.pending);
        let Some(store) = self.store.as_mut() else {
            return Vec::new();
        };

        match store.exchange(&pending) {
            Ok((history, generation)) => {
                let mut merged: BTreeMap<String, UvarRecord> = BTreeMap::new();
                for event in history {
                    match event {
                        UvarEvent::Set {
                            name,
                            value,
                            exported,
                        } => {
                            merged.insert(name, UvarRecord { value, exported });
                        }
                        UvarEvent::Erase { name } => {
                            merged.remove(&name);
                        }
                    }
                }

                let mut changed = Vec::new();
                for name in self.table.keys().chain(merged.keys()) {
                    if self.table.get(name) != merged.get(name) && !changed.contains(name) {
                        changed.push(name.clone());
                    }
                }

                tracing::trace!(
                    generation,
                    flushed = pending.len(),
                    changed = changed.len(),
                    "universal variable barrier"
                );
                self.table = merged;
                changed
            }
            Err(e) => {
                if !self.degraded {
                    tracing::warn!(
                        error = %e,
                        "universal variable store unusable; universal variables are session-local from here on"
                    );
                    self.degraded = true;
                }
                self.store = None;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{UvarError, UvarResult};
    use crate::store::MemStore;

    #[test]
    fn local_set_get_remove() {
        let mut sync = UvarSynchronizer::in_memory();
        assert!(sync.get("x").is_none());

        sync.set("x", "1".into(), false);
        assert_eq!(sync.get("x").map(|r| r.value.as_str()), Some("1"));

        assert!(sync.remove("x"));
        assert!(sync.get("x").is_none());
        assert!(!sync.remove("x"));
    }

    #[test]
    fn disjoint_writes_converge_to_union() {
        let store = MemStore::new();
        let mut a = UvarSynchronizer::with_store(store.clone());
        let mut b = UvarSynchronizer::with_store(store);

        a.set("from_a", "1".into(), false);
        b.set("from_b", "2".into(), false);

        a.barrier();
        b.barrier();
        a.barrier();

        for sync in [&a, &b] {
            assert_eq!(sync.get("from_a").map(|r| r.value.as_str()), Some("1"));
            assert_eq!(sync.get("from_b").map(|r| r.value.as_str()), Some("2"));
        }
    }

    #[test]
    fn conflicting_writes_resolve_by_store_order() {
        let store = MemStore::new();
        let mut a = UvarSynchronizer::with_store(store.clone());
        let mut b = UvarSynchronizer::with_store(store);

        a.set("n", "from-a".into(), false);
        b.set("n", "from-b".into(), false);

        a.barrier(); // store: [a]
        b.barrier(); // store: [a, b] -> b wins
        a.barrier();

        assert_eq!(a.get("n").map(|r| r.value.as_str()), Some("from-b"));
        assert_eq!(b.get("n").map(|r| r.value.as_str()), Some("from-b"));
    }

    #[test]
    fn erase_versus_set_resolves_by_store_order() {
        let store = MemStore::new();
        let mut a = UvarSynchronizer::with_store(store.clone());
        let mut b = UvarSynchronizer::with_store(store);

        a.set("n", "v".into(), false);
        a.barrier();
        b.barrier();

        b.remove("n");
        a.set("n", "v2".into(), false);
        b.barrier(); // store: [.., erase]
        a.barrier(); // store: [.., erase, set v2] -> the set wins
        b.barrier();

        assert_eq!(a.get("n").map(|r| r.value.as_str()), Some("v2"));
        assert_eq!(b.get("n").map(|r| r.value.as_str()), Some("v2"));
    }

    #[test]
    fn barrier_reports_remote_changes_only() {
        let store = MemStore::new();
        let mut a = UvarSynchronizer::with_store(store.clone());
        let mut b = UvarSynchronizer::with_store(store);

        a.set("mine", "1".into(), false);
        // Local writes were already visible locally: not a change.
        assert!(a.barrier().is_empty());

        b.barrier();
        b.set("theirs", "2".into(), true);
        b.barrier();

        assert_eq!(a.barrier(), vec!["theirs".to_string()]);
    }

    struct FailStore;

    impl UvarStore for FailStore {
        fn exchange(&mut self, _pending: &[UvarEvent]) -> UvarResult<(Vec<UvarEvent>, u64)> {
            Err(UvarError::ReadStore {
                path: "/nonexistent".into(),
                source: std::io::Error::other("boom"),
            })
        }
    }

    #[test]
    fn store_failure_degrades_to_session_local() {
        let mut sync = UvarSynchronizer::with_store(FailStore);
        sync.set("x", "1".into(), false);

        assert!(sync.barrier().is_empty());
        assert!(sync.is_degraded());
        // The local cache survives and further writes keep working.
        assert_eq!(sync.get("x").map(|r| r.value.as_str()), Some("1"));
        sync.set("y", "2".into(), false);
        sync.barrier();
        assert_eq!(sync.get("y").map(|r| r.value.as_str()), Some("2"));
    }
}
