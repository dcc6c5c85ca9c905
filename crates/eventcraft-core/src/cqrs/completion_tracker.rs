//! Completion Tracker: one-shot waiters keyed by sequence key.
//!
//! Registered at command ingress, resolved when the pipeline's terminal
//! stage writes a completion record. Not replicated: a waiter only ever
//! lives in the replica that accepted the command, so a different replica
//! observing the same completion simply finds no waiter and discards it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;

/// Terminal or in-flight status of a tracked command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Pending,
    Processing,
    Completed,
    Failed { error: String, kind: &'static str },
}

/// A resolved completion, handed to whichever caller is awaiting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub sequence_key: String,
    pub status: CompletionStatus,
    pub submitted_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

/// Failure returned by [`CompletionTracker::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No waiter was registered for this sequence key.
    NotRegistered,
    /// The wait exceeded its time budget before a terminal record arrived.
    TimedOut,
    /// The waiter was explicitly cancelled.
    Cancelled,
}

struct TrackedEntry {
    submitted_at: SystemTime,
    sender: Option<oneshot::Sender<CompletionRecord>>,
    terminal: Option<CompletionRecord>,
    recorded_at: Option<SystemTime>,
}

/// In-memory map from sequence key to one-shot completion waiter.
pub struct CompletionTracker {
    entries: Arc<RwLock<HashMap<String, TrackedEntry>>>,
    /// How long a terminal record may sit with no active waiter before it
    /// is discarded by `sweep`.
    grace_period: Duration,
}

impl CompletionTracker {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            grace_period,
        }
    }

    /// Register a waiter at command ingress. Returns a receiver the caller
    /// can wait on directly, or via [`CompletionTracker::wait`] for a
    /// time-bounded wait.
    pub async fn register(&self, sequence_key: impl Into<String>) -> oneshot::Receiver<CompletionRecord> {
        let (tx, rx) = oneshot::channel();
        let key = sequence_key.into();
        self.entries.write().await.insert(
            key,
            TrackedEntry {
                submitted_at: SystemTime::now(),
                sender: Some(tx),
                terminal: None,
                recorded_at: None,
            },
        );
        rx
    }

    /// Write the terminal record for `sequence_key`, resolving its waiter
    /// if one is still registered. If no waiter is registered — the
    /// submitter already timed out, or a different replica produced this
    /// notification — the record is retained only until `grace_period`
    /// elapses, then swept.
    pub async fn complete(&self, sequence_key: &str, status: CompletionStatus) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(sequence_key) else {
            // No ingress was ever registered locally for this key (e.g. a
            // different replica's submitter). Nothing to resolve.
            return;
        };

        let record = CompletionRecord {
            sequence_key: sequence_key.to_string(),
            status,
            submitted_at: entry.submitted_at,
            completed_at: Some(SystemTime::now()),
        };

        if let Some(sender) = entry.sender.take() {
            // Ignore failure: the receiver may already have been dropped
            // (caller gave up / timed out).
            let _ = sender.send(record.clone());
        }

        entry.terminal = Some(record);
        entry.recorded_at = Some(SystemTime::now());
    }

    /// Wait up to `budget` for `sequence_key`'s terminal record.
    pub async fn wait(&self, rx: oneshot::Receiver<CompletionRecord>, budget: Duration) -> Result<CompletionRecord, WaitError> {
        match timeout(budget, rx).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(_canceled)) => Err(WaitError::Cancelled),
            Err(_elapsed) => Err(WaitError::TimedOut),
        }
    }

    /// Drop a waiter without waiting for completion (e.g. caller cancelled
    /// or gave up). The entry, if later completed, becomes eligible for
    /// `sweep` after the grace period.
    pub async fn cancel(&self, sequence_key: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(sequence_key) {
            entry.sender = None;
        }
    }

    /// The terminal record for `sequence_key`, if it has already completed.
    /// Used to answer a duplicate resubmission (same client-supplied
    /// `eventId`) without re-running the command.
    pub async fn peek(&self, sequence_key: &str) -> Option<CompletionRecord> {
        self.entries
            .read()
            .await
            .get(sequence_key)
            .and_then(|e| e.terminal.clone())
    }

    /// True while an entry exists and has not yet received a terminal
    /// status — the pipeline has observed the sequence key but not yet
    /// resolved it.
    pub async fn is_pending(&self, sequence_key: &str) -> bool {
        self.entries
            .read()
            .await
            .get(sequence_key)
            .map(|e| e.terminal.is_none())
            .unwrap_or(false)
    }

    /// Discard terminal records that have had no active waiter for longer
    /// than the grace period. Orphaned entries (timed-out submitters, or
    /// completions observed by a replica with no local waiter) would
    /// otherwise accumulate forever.
    pub async fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_key, entry| {
            let orphaned_and_terminal = entry.sender.is_none() && entry.terminal.is_some();
            if !orphaned_and_terminal {
                return true;
            }
            let age = entry
                .recorded_at
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or(Duration::ZERO);
            age < self.grace_period
        });

        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_registered_waiter() {
        let tracker = CompletionTracker::new(Duration::from_secs(60));
        let rx = tracker.register("seq-1").await;

        tracker.complete("seq-1", CompletionStatus::Completed).await;

        let record = tracker.wait(rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(record.status, CompletionStatus::Completed);
    }

    #[tokio::test]
    async fn wait_times_out_without_a_completion() {
        let tracker = CompletionTracker::new(Duration::from_secs(60));
        let rx = tracker.register("seq-1").await;

        let result = tracker.wait(rx, Duration::from_millis(20)).await;
        assert_eq!(result, Err(WaitError::TimedOut));
    }

    #[tokio::test]
    async fn complete_with_no_registered_waiter_is_a_no_op() {
        let tracker = CompletionTracker::new(Duration::from_secs(60));
        // No register() call for this key — simulates a different replica
        // observing a completion it never submitted.
        tracker.complete("seq-missing", CompletionStatus::Completed).await;
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn is_pending_reflects_absence_of_terminal_status() {
        let tracker = CompletionTracker::new(Duration::from_secs(60));
        let _rx = tracker.register("seq-1").await;
        assert!(tracker.is_pending("seq-1").await);

        tracker.complete("seq-1", CompletionStatus::Completed).await;
        assert!(!tracker.is_pending("seq-1").await);
    }

    #[tokio::test]
    async fn sweep_discards_orphaned_terminal_records_after_grace_period() {
        let tracker = CompletionTracker::new(Duration::from_millis(10));
        let rx = tracker.register("seq-1").await;
        drop(rx); // caller gave up without cancel()

        tracker.complete("seq-1", CompletionStatus::Completed).await;
        assert_eq!(tracker.sweep().await, 0); // too young still

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tracker.sweep().await, 1);
        assert!(tracker.is_empty().await);
    }

    #[tokio::test]
    async fn cancel_detaches_the_waiter_without_removing_the_entry() {
        let tracker = CompletionTracker::new(Duration::from_secs(60));
        let _rx = tracker.register("seq-1").await;

        tracker.cancel("seq-1").await;
        tracker.complete("seq-1", CompletionStatus::Completed).await;

        assert_eq!(tracker.len().await, 1);
    }
}
