//! Sequence implementation
//!
//! A `Sequence` tracks a position in the ring: the producer cursor, a
//! consumer's progress, or the shared claim counter of a worker pool. The
//! value sits alone on its cache line so that producers and consumers hammering
//! neighbouring counters never invalidate each other's lines.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicI64, Ordering};
use std::sync::Arc;

use crate::disruptor::INITIAL_CURSOR_VALUE;

/// A monotonic 64-bit position counter padded to a full cache line
///
/// `CachePadded` aligns the counter to the target's cache line (128 bytes on
/// x86_64 and aarch64 to cover adjacent-line prefetch) and pads the struct to
/// that size, so the 8-byte value has no neighbours on either side.
///
/// Memory ordering per operation:
/// - `get`: acquire load
/// - `set`: release store
/// - `set_volatile`: release store followed by a full fence (store-load barrier)
/// - `compare_and_set`, `increment_and_get`, `add_and_get`: acquire-release RMW
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a new sequence with the given initial value
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial_value)),
        }
    }

    /// Create a sequence at `INITIAL_CURSOR_VALUE`
    pub fn new_with_initial_value() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }

    /// Get the current sequence value
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Set the sequence value
    ///
    /// Writes made before this call are visible to any thread that observes the
    /// new value through `get`.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Set the sequence value and fence subsequent loads behind the store
    ///
    /// Used where the caller goes on to read other sequences and those reads
    /// must not be reordered before this store.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Atomically set the value to `new` if it currently equals `expected`
    ///
    /// # Returns
    /// True if the swap happened
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically increment and return the new value
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Atomically add `increment` and return the new value
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new_with_initial_value()
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("value", &self.get())
            .finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Minimum value across `sequences`, folded from `minimum`
///
/// With an empty slice this is `minimum` itself, which is how an unconstrained
/// producer sees "no consumers": it may fill the whole buffer.
pub fn get_minimum_sequence(sequences: &[Arc<Sequence>], minimum: i64) -> i64 {
    sequences
        .iter()
        .fold(minimum, |min, sequence| min.min(sequence.get()))
}

/// A fixed set of sequences read as one: the slowest member wins
#[derive(Debug, Clone)]
pub struct FixedSequenceGroup {
    sequences: Box<[Arc<Sequence>]>,
}

impl FixedSequenceGroup {
    pub fn new(sequences: &[Arc<Sequence>]) -> Self {
        Self {
            sequences: sequences.to_vec().into_boxed_slice(),
        }
    }

    /// Minimum of all member sequences
    #[inline]
    pub fn get(&self) -> i64 {
        get_minimum_sequence(&self.sequences, i64::MAX)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// The position a barrier must not read past, besides the producer cursor
///
/// A consumer with no upstream dependency gates directly on the cursor; one
/// that depends on other consumers gates on the slowest of them.
#[derive(Debug, Clone)]
pub enum DependentSequence {
    Cursor(Arc<Sequence>),
    Group(FixedSequenceGroup),
}

impl DependentSequence {
    /// Build the dependent view for a barrier over `cursor` and `dependencies`
    pub fn new(cursor: &Arc<Sequence>, dependencies: &[Arc<Sequence>]) -> Self {
        if dependencies.is_empty() {
            DependentSequence::Cursor(Arc::clone(cursor))
        } else {
            DependentSequence::Group(FixedSequenceGroup::new(dependencies))
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        match self {
            DependentSequence::Cursor(cursor) => cursor.get(),
            DependentSequence::Group(group) => group.get(),
        }
    }
}
