//! Gating sequence set
//!
//! The producer must never overrun the slowest consumer. Consumers join and
//! leave at configuration time, while producers read the set on every capacity
//! check. The set is therefore a copy-on-write array behind an atomically
//! swapped pointer: readers take an immutable snapshot, writers build a new
//! array and CAS it in, retrying on contention. No lock is taken on either side.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::disruptor::sequence::{get_minimum_sequence, Sequence};

/// Copy-on-write array of the sequences a producer gates on
pub struct GatingSequences {
    inner: ArcSwap<Vec<Arc<Sequence>>>,
}

impl GatingSequences {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Take an immutable snapshot of the current set
    #[inline]
    pub fn snapshot(&self) -> Arc<Vec<Arc<Sequence>>> {
        self.inner.load_full()
    }

    /// Minimum across the set, folded from `default`
    #[inline]
    pub fn minimum(&self, default: i64) -> i64 {
        get_minimum_sequence(&self.inner.load(), default)
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Append `to_add` to the set
    ///
    /// Each added sequence is moved to `cursor()` before the new array becomes
    /// visible and once more after the swap, so a consumer that joins late
    /// starts at the producer's position instead of gating on a stale value.
    pub fn add<F>(&self, to_add: &[Arc<Sequence>], cursor: F)
    where
        F: Fn() -> i64,
    {
        loop {
            let current = self.inner.load_full();
            let cursor_value = cursor();

            let mut updated = Vec::with_capacity(current.len() + to_add.len());
            updated.extend(current.iter().cloned());
            for sequence in to_add {
                sequence.set(cursor_value);
                updated.push(Arc::clone(sequence));
            }

            let previous = self.inner.compare_and_swap(&current, Arc::new(updated));
            if Arc::ptr_eq(&previous, &current) {
                break;
            }
        }

        let cursor_value = cursor();
        for sequence in to_add {
            sequence.set(cursor_value);
        }
        tracing::trace!(added = to_add.len(), cursor = cursor_value, "gating sequences added");
    }

    /// Remove every occurrence of `sequence` from the set
    ///
    /// # Returns
    /// True if at least one entry was removed
    pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        loop {
            let current = self.inner.load_full();
            let removed = current.iter().filter(|s| Arc::ptr_eq(s, sequence)).count();
            if removed == 0 {
                return false;
            }

            let updated: Vec<Arc<Sequence>> = current
                .iter()
                .filter(|s| !Arc::ptr_eq(s, sequence))
                .cloned()
                .collect();

            let previous = self.inner.compare_and_swap(&current, Arc::new(updated));
            if Arc::ptr_eq(&previous, &current) {
                tracing::trace!(removed, "gating sequence removed");
                return true;
            }
        }
    }
}

impl Default for GatingSequences {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GatingSequences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.inner.load().iter()).finish()
    }
}
