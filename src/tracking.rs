//! # Tracking Number Allocator
//!
//! Issues the sequential tracking numbers printed on each label and keeps the
//! run statistics. Both live behind one mutex so a counter update and the
//! allocation it belongs to are never observed half-done.
//!
//! ## Seeding
//!
//! At startup the allocator is seeded from the tracking numbers already in the
//! audit log: the next number is `max + 1`, or the configured base when the
//! log is empty or missing. Numbers are never handed out twice within a run
//! or across restarts, and numbers claimed by an operator edit are skipped.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::LabelfeedError;

/// First tracking number when there is no history.
pub const DEFAULT_BASE_TRACKING_NUMBER: u64 = 60000;

/// Counters for one run of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Fragments flushed by the reader and handed to the controller
    pub fragments: u64,
    /// Fragments that parsed into a record
    pub parsed: u64,
    pub parse_errors: u64,
    /// Records whose primary label printed
    pub printed: u64,
    /// Records whose primary label failed
    pub print_failures: u64,
    pub secondary_failures: u64,
    pub queued: u64,
    pub discarded: u64,
    pub duplicates: u64,
    /// Appends where the row or the archive could not be written
    pub audit_failures: u64,
}

#[derive(Debug)]
struct Counters {
    next: u64,
    issued: BTreeSet<u64>,
    stats: RunStats,
}

/// Thread-safe tracking number source, shared by ingestion and operator edits.
#[derive(Debug)]
pub struct TrackingAllocator {
    counters: Mutex<Counters>,
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TRACKING_NUMBER)
    }
}

impl TrackingAllocator {
    /// Start at `base` with no history.
    pub fn new(base: u64) -> Self {
        Self::seeded(std::iter::empty(), base)
    }

    /// Start after the highest previously issued number, or at `base`.
    pub fn seeded(issued: impl IntoIterator<Item = u64>, base: u64) -> Self {
        let issued: BTreeSet<u64> = issued.into_iter().collect();
        let next = issued.last().map_or(base, |max| max + 1);
        Self {
            counters: Mutex::new(Counters {
                next,
                issued,
                stats: RunStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue the next tracking number.
    pub fn next(&self) -> u64 {
        let mut counters = self.lock();
        loop {
            let candidate = counters.next;
            counters.next += 1;
            if counters.issued.insert(candidate) {
                return candidate;
            }
        }
    }

    /// The number `next()` would return, without issuing it.
    pub fn peek(&self) -> u64 {
        let counters = self.lock();
        (counters.next..)
            .find(|n| !counters.issued.contains(n))
            .unwrap_or(counters.next)
    }

    /// Reserve an operator-chosen number.
    ///
    /// ## Errors
    ///
    /// `TrackingCollision` if the number was already issued or claimed.
    pub fn claim(&self, number: u64) -> Result<(), LabelfeedError> {
        let mut counters = self.lock();
        if counters.issued.insert(number) {
            Ok(())
        } else {
            Err(LabelfeedError::TrackingCollision(number))
        }
    }

    /// Snapshot of the run statistics.
    pub fn stats(&self) -> RunStats {
        self.lock().stats
    }

    /// Update run statistics under the allocator lock.
    pub fn record(&self, update: impl FnOnce(&mut RunStats)) {
        update(&mut self.lock().stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_base_without_history() {
        let allocator = TrackingAllocator::new(60000);
        assert_eq!(allocator.next(), 60000);
        assert_eq!(allocator.next(), 60001);
    }

    #[test]
    fn test_seeded_from_history() {
        let allocator = TrackingAllocator::seeded([60010, 60003, 60007], 60000);
        assert_eq!(allocator.peek(), 60011);
        assert_eq!(allocator.next(), 60011);
    }

    #[test]
    fn test_claim_collides_with_issued() {
        let allocator = TrackingAllocator::new(100);
        let issued = allocator.next();
        assert!(matches!(
            allocator.claim(issued),
            Err(LabelfeedError::TrackingCollision(100))
        ));
        assert!(allocator.claim(500).is_ok());
        assert!(allocator.claim(500).is_err());
        assert_eq!(allocator.next(), 101);
    }

    #[test]
    fn test_next_skips_claimed_numbers() {
        let allocator = TrackingAllocator::new(100);
        allocator.claim(101).unwrap();
        assert_eq!(allocator.next(), 100);
        assert_eq!(allocator.peek(), 102);
        assert_eq!(allocator.next(), 102);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_numbers() {
        let allocator = Arc::new(TrackingAllocator::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || (0..250).map(|_| allocator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let numbers = handle.join().unwrap();
            // Each caller sees its own numbers strictly increasing
            assert!(numbers.windows(2).all(|w| w[0] < w[1]));
            for n in numbers {
                assert!(seen.insert(n), "number {} issued twice", n);
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_record_updates_stats() {
        let allocator = TrackingAllocator::default();
        allocator.record(|s| s.parse_errors += 1);
        allocator.record(|s| s.fragments += 2);
        let stats = allocator.stats();
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.fragments, 2);
    }
}
