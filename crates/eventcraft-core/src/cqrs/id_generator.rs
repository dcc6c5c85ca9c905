//! Snowflake-style 64-bit sequence generator.
//!
//! Encodes a time-anchored counter in the high bits and a replica id in the
//! low bits, so values are strictly increasing within a replica and
//! globally unique across replicas of the same engine without any
//! cross-replica coordination.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved for the replica id. 10 bits allows 1024 replicas per
/// engine; the remainder of the 64-bit value is the time-anchored counter.
const REPLICA_BITS: u32 = 10;
const REPLICA_MASK: i64 = (1 << REPLICA_BITS) - 1;
const COUNTER_SHIFT: u32 = REPLICA_BITS;

/// Fatal: the counter has exhausted the bits available to it. This should
/// only happen after an astronomical number of ids have been minted by one
/// replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdGeneratorExhausted;

impl std::fmt::Display for IdGeneratorExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "identifier generator exhausted its counter space")
    }
}

impl std::error::Error for IdGeneratorExhausted {}

/// Generates strictly increasing 64-bit ids, unique across replicas.
pub struct IdGenerator {
    replica_id: i64,
    last: AtomicI64,
}

impl IdGenerator {
    /// `replica_id` is truncated to the low `REPLICA_BITS` bits; callers
    /// should keep replica ids within `0..1024` to avoid collisions.
    pub fn new(replica_id: u16) -> Self {
        Self {
            replica_id: (replica_id as i64) & REPLICA_MASK,
            last: AtomicI64::new(i64::MIN),
        }
    }

    /// Produce the next id. Fails only on counter exhaustion, which is
    /// treated as fatal by callers.
    pub fn next_id(&self) -> Result<i64, IdGeneratorExhausted> {
        let counter = now_millis();

        loop {
            let prev = self.last.load(Ordering::SeqCst);
            let prev_counter = prev >> COUNTER_SHIFT;

            let next_counter = if counter > prev_counter {
                counter
            } else {
                prev_counter
                    .checked_add(1)
                    .ok_or(IdGeneratorExhausted)?
            };

            let candidate = next_counter
                .checked_shl(COUNTER_SHIFT)
                .ok_or(IdGeneratorExhausted)?
                | self.replica_id;

            if self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(candidate);
            }
            // Lost the race with another caller on this replica; retry with
            // the updated `last`.
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_strictly_increase_within_a_replica() {
        let gen = IdGenerator::new(3);
        let mut last = i64::MIN;
        for _ in 0..1000 {
            let id = gen.next_id().unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn replica_id_is_encoded_in_low_bits() {
        let gen = IdGenerator::new(7);
        let id = gen.next_id().unwrap();
        assert_eq!(id & REPLICA_MASK, 7);
    }

    #[test]
    fn distinct_replicas_never_collide() {
        let a = IdGenerator::new(1);
        let b = IdGenerator::new(2);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(a.next_id().unwrap()));
            assert!(seen.insert(b.next_id().unwrap()));
        }
    }

    #[tokio::test]
    async fn concurrent_callers_on_same_replica_never_collide() {
        let gen = Arc::new(IdGenerator::new(5));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gen = Arc::clone(&gen);
            handles.push(tokio::spawn(async move {
                (0..200).map(|_| gen.next_id().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
