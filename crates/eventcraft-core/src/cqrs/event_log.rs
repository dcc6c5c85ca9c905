//! Append-only Event Log keyed by `(sequence, key)`.
//!
//! Distinct from [`crate::cqrs::backend::EventStoreBackend`], which models
//! per-aggregate streams for classic CQRS event stores: this log is the
//! engine's single append-only ledger, ordered by a process-wide sequence
//! number and partitioned by domain key for replay.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Event;

/// `(sequence, key)` — the log's primary ordering and partitioning key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceKey {
    pub sequence: i64,
    pub key: String,
}

impl SequenceKey {
    pub fn new(sequence: i64, key: impl Into<String>) -> Self {
        Self {
            sequence,
            key: key.into(),
        }
    }
}

/// Append-only, in-memory Event Log.
///
/// `append` is idempotent under identical `seqKey`: re-appending the same
/// sequence number is a no-op rather than a duplicate entry, so replay of
/// the Pending Events Log after a crash between stages 4 and 5 of the
/// pipeline cannot double-write the ledger.
pub struct EventLog<E: Event> {
    entries: Arc<RwLock<BTreeMap<SequenceKey, E>>>,
    by_key: Arc<RwLock<std::collections::HashMap<String, Vec<i64>>>>,
}

impl<E: Event> EventLog<E> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            by_key: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }

    /// Write `event` at `seq_key`. A second append at the same `seq_key` is
    /// a no-op (idempotent replay after a crash-before-advance).
    pub async fn append(&self, seq_key: SequenceKey, event: E) {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&seq_key) {
            return;
        }

        let mut by_key = self.by_key.write().await;
        by_key
            .entry(seq_key.key.clone())
            .or_default()
            .push(seq_key.sequence);

        entries.insert(seq_key, event);
    }

    pub async fn get(&self, seq_key: &SequenceKey) -> Option<E> {
        self.entries.read().await.get(seq_key).cloned()
    }

    /// Events for `key`, ordered by sequence.
    pub async fn events_by_key(&self, key: &str) -> Vec<E> {
        self.events_by_key_from_sequence(key, i64::MIN).await
    }

    /// Events for `key` with `sequence >= from_seq`, ordered by sequence.
    pub async fn events_by_key_from_sequence(&self, key: &str, from_seq: i64) -> Vec<E> {
        let by_key = self.by_key.read().await;
        let Some(sequences) = by_key.get(key) else {
            return Vec::new();
        };

        let entries = self.entries.read().await;
        let mut sorted: Vec<i64> = sequences.iter().copied().filter(|s| *s >= from_seq).collect();
        sorted.sort_unstable();

        sorted
            .into_iter()
            .filter_map(|seq| entries.get(&SequenceKey::new(seq, key)).cloned())
            .collect()
    }

    /// Visit every event in sequence order.
    pub async fn replay_all<F: FnMut(&SequenceKey, &E)>(&self, mut visitor: F) {
        let entries = self.entries.read().await;
        for (seq_key, event) in entries.iter() {
            visitor(seq_key, event);
        }
    }

    /// Visit every event for `key`, in sequence order.
    pub async fn replay_by_key<F: FnMut(&E)>(&self, key: &str, mut visitor: F) {
        for event in self.events_by_key(key).await {
            visitor(&event);
        }
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn count_by_key(&self, key: &str) -> usize {
        self.by_key
            .read()
            .await
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn latest_sequence(&self) -> Option<i64> {
        self.entries.read().await.keys().last().map(|k| k.sequence)
    }

    pub async fn latest_sequence_by_key(&self, key: &str) -> Option<i64> {
        self.by_key
            .read()
            .await
            .get(key)
            .and_then(|seqs| seqs.iter().max().copied())
    }
}

impl<E: Event> Default for EventLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Clone for EventLog<E> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            by_key: Arc::clone(&self.by_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Stamped(i64);
    impl Event for Stamped {}

    #[tokio::test]
    async fn append_is_idempotent_under_identical_seq_key() {
        let log = EventLog::<Stamped>::new();
        let key = SequenceKey::new(1, "k1");

        log.append(key.clone(), Stamped(1)).await;
        log.append(key.clone(), Stamped(999)).await;

        assert_eq!(log.count().await, 1);
        assert_eq!(log.get(&key).await, Some(Stamped(1)));
    }

    #[tokio::test]
    async fn events_by_key_are_ordered_despite_interleaved_writes() {
        let log = EventLog::<Stamped>::new();

        log.append(SequenceKey::new(1, "a"), Stamped(1)).await;
        log.append(SequenceKey::new(2, "b"), Stamped(2)).await;
        log.append(SequenceKey::new(3, "a"), Stamped(3)).await;
        log.append(SequenceKey::new(4, "b"), Stamped(4)).await;

        let a_events = log.events_by_key("a").await;
        assert_eq!(a_events, vec![Stamped(1), Stamped(3)]);

        let b_events = log.events_by_key("b").await;
        assert_eq!(b_events, vec![Stamped(2), Stamped(4)]);
    }

    #[tokio::test]
    async fn from_sequence_filters_lower_sequences() {
        let log = EventLog::<Stamped>::new();
        log.append(SequenceKey::new(1, "a"), Stamped(1)).await;
        log.append(SequenceKey::new(5, "a"), Stamped(5)).await;
        log.append(SequenceKey::new(9, "a"), Stamped(9)).await;

        let events = log.events_by_key_from_sequence("a", 5).await;
        assert_eq!(events, vec![Stamped(5), Stamped(9)]);
    }

    #[tokio::test]
    async fn latest_sequence_tracks_global_and_per_key() {
        let log = EventLog::<Stamped>::new();
        log.append(SequenceKey::new(1, "a"), Stamped(1)).await;
        log.append(SequenceKey::new(7, "b"), Stamped(7)).await;

        assert_eq!(log.latest_sequence().await, Some(7));
        assert_eq!(log.latest_sequence_by_key("a").await, Some(1));
        assert_eq!(log.latest_sequence_by_key("b").await, Some(7));
        assert_eq!(log.latest_sequence_by_key("missing").await, None);
    }

    #[tokio::test]
    async fn replay_all_visits_in_sequence_order() {
        let log = EventLog::<Stamped>::new();
        log.append(SequenceKey::new(3, "b"), Stamped(3)).await;
        log.append(SequenceKey::new(1, "a"), Stamped(1)).await;
        log.append(SequenceKey::new(2, "a"), Stamped(2)).await;

        let mut seen = Vec::new();
        log.replay_all(|seq_key, event| seen.push((seq_key.sequence, event.clone())))
            .await;

        assert_eq!(
            seen,
            vec![(1, Stamped(1)), (2, Stamped(2)), (3, Stamped(3))]
        );
    }
}
