//! Materialized View Store: domain key → current projected state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::event_log::EventLog;
use super::Event;

/// Maps domain key `K` to current projected state `S`.
///
/// `execute_on_key` is the only mutator and is serialized per key via a
/// per-key lock, so concurrent updates to distinct keys proceed in
/// parallel while updates to the same key never race.
pub struct ViewStore<S: Clone + Send + Sync + 'static> {
    state: Arc<RwLock<HashMap<String, S>>>,
    key_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl<S: Clone + Send + Sync + 'static> ViewStore<S> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(HashMap::new())),
            key_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<S> {
        self.state.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: impl Into<String>, value: S) {
        self.state.write().await.insert(key.into(), value);
    }

    pub async fn remove(&self, key: &str) -> Option<S> {
        self.state.write().await.remove(key)
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.state.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.state.read().await.keys().cloned().collect()
    }

    pub async fn values(&self) -> Vec<S> {
        self.state.read().await.values().cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn clear(&self) {
        self.state.write().await.clear();
        self.key_locks.write().await.clear();
    }

    /// Linear scan, returning every `(key, value)` satisfying `predicate`.
    pub async fn query<F: Fn(&str, &S) -> bool>(&self, predicate: F) -> Vec<(String, S)> {
        self.state
            .read()
            .await
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.key_locks.read().await.get(key) {
            return Arc::clone(lock);
        }
        let mut locks = self.key_locks.write().await;
        Arc::clone(locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Atomic read-modify-write on `key`. `mutator` receives the current
    /// value (`None` if absent) and returns the new value, or `None` to
    /// delete. No concurrent mutator runs for the same key; mutators on
    /// distinct keys run in parallel.
    ///
    /// After this returns, `get(key)` reflects `mutator`'s result until the
    /// next mutation at `key`.
    pub async fn execute_on_key<F>(&self, key: &str, mutator: F) -> Option<S>
    where
        F: FnOnce(Option<S>) -> Option<S>,
    {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let current = self.state.read().await.get(key).cloned();
        let next = mutator(current);

        let mut state = self.state.write().await;
        match next.clone() {
            Some(value) => {
                state.insert(key.to_string(), value);
            }
            None => {
                state.remove(key);
            }
        }
        next
    }

    /// Clear the store, then replay `event_log` through `projector` to
    /// reconstruct every projection from scratch. Used on cold start when
    /// no persistent view snapshot is available.
    pub async fn rebuild<E, F>(&self, event_log: &EventLog<E>, projector: F)
    where
        E: Event,
        F: Fn(Option<S>, &E) -> Option<S>,
    {
        self.clear().await;

        // Project each key's full history in sequence order.
        let keys: std::collections::HashSet<String> = {
            let mut ks = std::collections::HashSet::new();
            event_log
                .replay_all(|seq_key, _| {
                    ks.insert(seq_key.key.clone());
                })
                .await;
            ks
        };

        for key in keys {
            let events = event_log.events_by_key(&key).await;
            let mut state = None;
            for event in &events {
                state = projector(state, event);
            }
            match state {
                Some(value) => self.put(key, value).await,
                None => {
                    self.remove(&key).await;
                }
            }
        }
    }
}

impl<S: Clone + Send + Sync + 'static> Default for ViewStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone + Send + Sync + 'static> Clone for ViewStore<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            key_locks: Arc::clone(&self.key_locks),
        }
    }
}
