//! Sequencer Implementation
//!
//! Sequencers hand out slots to producers and keep them from lapping the
//! slowest consumer. Two algorithms are provided:
//!
//! - `SingleProducerSequencer`: claims with plain, thread-confined arithmetic;
//!   only publishing crosses threads.
//! - `MultiProducerSequencer`: claims with a CAS on the cursor and tracks
//!   publication per slot, so publishes may complete out of claim order while
//!   consumers still never read past a gap.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;

use crate::disruptor::{
    checked_buffer_size, log2, Backoff, DisruptorError, GatingSequences, ParkBackoff,
    ProcessingSequenceBarrier, Result, Sequence, SequenceBarrier, WaitStrategy,
    INITIAL_CURSOR_VALUE,
};

/// Coordinates claiming and publishing of ring slots
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The producer cursor sequence
    fn cursor(&self) -> &Arc<Sequence>;

    /// Current value of the producer cursor
    fn get_cursor(&self) -> i64 {
        self.cursor().get()
    }

    /// Size of the ring this sequencer indexes
    fn get_buffer_size(&self) -> usize;

    /// The wait strategy shared with every barrier created from this sequencer
    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy>;

    /// Whether `required_capacity` slots could be claimed right now
    ///
    /// Only an indication under concurrency.
    fn has_available_capacity(&self, required_capacity: i64) -> bool;

    /// Slots the producer could claim before catching up with the slowest consumer
    fn remaining_capacity(&self) -> i64;

    /// Claim the next slot, waiting for capacity
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim the next `n` slots, waiting for capacity
    ///
    /// # Returns
    /// The highest claimed sequence; the claim covers `(returned - n, returned]`
    ///
    /// # Errors
    /// `InvalidArgument` if `n < 1` or `n` exceeds the buffer size
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Claim the next slot without waiting
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Claim the next `n` slots without waiting
    ///
    /// # Errors
    /// `InsufficientCapacity` if fewer than `n` slots are free,
    /// `InvalidArgument` if `n < 1` or `n` exceeds the buffer size
    fn try_next_n(&self, n: i64) -> Result<i64>;

    /// Move the claim position to `sequence` without any capacity check
    fn claim(&self, sequence: i64);

    /// Make `sequence` visible to consumers and wake blocked waiters
    fn publish(&self, sequence: i64);

    /// Make every sequence in `[lo, hi]` visible to consumers
    fn publish_range(&self, lo: i64, hi: i64);

    /// Whether `sequence` has been published and may be read
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `[lower_bound, available_sequence]` such that every
    /// slot from `lower_bound` up to it is published
    ///
    /// Returns `lower_bound - 1` when `lower_bound` itself is unpublished.
    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64;

    /// The set of consumer sequences this sequencer must not overrun
    fn gating_sequences(&self) -> &GatingSequences;

    /// Add consumer sequences to the gating set
    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        let cursor = self.cursor();
        self.gating_sequences()
            .add(gating_sequences, || cursor.get());
    }

    /// Remove `sequence` from the gating set
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences().remove(sequence)
    }

    /// Minimum over the gating set, or the cursor value when there is none
    fn get_minimum_sequence(&self) -> i64 {
        self.gating_sequences().minimum(self.get_cursor())
    }

    /// Create a barrier over this sequencer's cursor and `sequences_to_track`
    fn new_barrier(self: Arc<Self>, sequences_to_track: &[Arc<Sequence>])
        -> Arc<dyn SequenceBarrier>;
}

/// State shared by both sequencer algorithms
#[derive(Debug)]
struct SequencerCore {
    buffer_size: i64,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: GatingSequences,
    backoff: Arc<dyn Backoff>,
}

impl SequencerCore {
    fn new(
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        backoff: Arc<dyn Backoff>,
    ) -> Result<Self> {
        Ok(Self {
            buffer_size: checked_buffer_size(buffer_size)?,
            wait_strategy,
            cursor: Arc::new(Sequence::new_with_initial_value()),
            gating_sequences: GatingSequences::new(),
            backoff,
        })
    }

    fn check_batch_size(&self, n: i64) -> Result<()> {
        if n < 1 {
            return Err(DisruptorError::InvalidArgument(format!(
                "n must be > 0, got: {n}"
            )));
        }
        if n > self.buffer_size {
            return Err(DisruptorError::InvalidArgument(format!(
                "n must be <= buffer size {}, got: {n}",
                self.buffer_size
            )));
        }
        Ok(())
    }

    #[inline]
    fn buffer_size_usize(&self) -> usize {
        // Validated as a positive power of two at construction.
        self.buffer_size as usize
    }
}

/// Claim state owned by the single producer thread
///
/// Only the producer writes these, so relaxed loads and stores suffice and no
/// read-modify-write is needed. Breaking the single-writer contract is a logic
/// error, never a data race.
#[derive(Debug)]
struct ProducerCursor {
    /// Highest sequence handed out by `next`/`try_next`
    next_value: AtomicI64,
    /// Last observed minimum gating sequence
    cached_value: AtomicI64,
}

impl ProducerCursor {
    #[inline]
    fn next_value(&self) -> i64 {
        self.next_value.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_next_value(&self, value: i64) {
        self.next_value.store(value, Ordering::Relaxed);
    }

    #[inline]
    fn cached_value(&self) -> i64 {
        self.cached_value.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_cached_value(&self, value: i64) {
        self.cached_value.store(value, Ordering::Relaxed);
    }
}

/// Producer-side fields behind the single-writer contract
struct ProducerLocal {
    cursor: ProducerCursor,
    #[cfg(debug_assertions)]
    in_use: AtomicBool,
}

impl ProducerLocal {
    fn new() -> Self {
        Self {
            cursor: ProducerCursor {
                next_value: AtomicI64::new(INITIAL_CURSOR_VALUE),
                cached_value: AtomicI64::new(INITIAL_CURSOR_VALUE),
            },
            #[cfg(debug_assertions)]
            in_use: AtomicBool::new(false),
        }
    }

    #[inline]
    fn with<R>(&self, f: impl FnOnce(&ProducerCursor) -> R) -> R {
        #[cfg(debug_assertions)]
        let _guard = ExclusiveUse::enter(&self.in_use);
        f(&self.cursor)
    }
}

#[cfg(debug_assertions)]
struct ExclusiveUse<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl<'a> ExclusiveUse<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        if flag.swap(true, Ordering::Acquire) {
            panic!("SingleProducerSequencer claimed from more than one thread at once");
        }
        Self(flag)
    }
}

#[cfg(debug_assertions)]
impl Drop for ExclusiveUse<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequencer for exactly one producer thread
///
/// # Single-writer contract
/// `next`, `next_n`, `try_next`, `try_next_n`, `claim`, `has_available_capacity`
/// and `remaining_capacity` must only be called from the one producer thread
/// (or from threads that hand the producer role over with proper
/// synchronization). Concurrent claims would hand out the same sequence twice;
/// debug builds panic on overlapping calls. `publish`, `is_available`, the
/// gating methods and barriers are safe from any thread.
pub struct SingleProducerSequencer {
    core: SequencerCore,
    producer: ProducerLocal,
}

impl SingleProducerSequencer {
    /// Create a new single producer sequencer
    ///
    /// # Errors
    /// `InvalidBufferSize` if `buffer_size` is not a positive power of 2
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        Self::with_backoff(buffer_size, wait_strategy, Arc::new(ParkBackoff::default()))
    }

    /// Create a sequencer with a custom back-off for full-ring waits
    pub fn with_backoff(
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        backoff: Arc<dyn Backoff>,
    ) -> Result<Self> {
        Ok(Self {
            core: SequencerCore::new(buffer_size, wait_strategy, backoff)?,
            producer: ProducerLocal::new(),
        })
    }

    fn has_capacity(&self, producer: &ProducerCursor, required: i64, do_store: bool) -> bool {
        let next_value = producer.next_value();
        let wrap_point = (next_value + required) - self.core.buffer_size;
        let cached_gating_sequence = producer.cached_value();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            if do_store {
                self.core.cursor.set_volatile(next_value);
            }

            let min_sequence = self.core.gating_sequences.minimum(next_value);
            producer.set_cached_value(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for SingleProducerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleProducerSequencer")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Sequencer for SingleProducerSequencer {
    fn cursor(&self) -> &Arc<Sequence> {
        &self.core.cursor
    }

    fn get_buffer_size(&self) -> usize {
        self.core.buffer_size_usize()
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.core.wait_strategy
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.producer
            .with(|producer| self.has_capacity(producer, required_capacity, false))
    }

    fn remaining_capacity(&self) -> i64 {
        self.producer.with(|producer| {
            let next_value = producer.next_value();
            let consumed = self.core.gating_sequences.minimum(next_value);
            self.core.buffer_size - (next_value - consumed)
        })
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.core.check_batch_size(n)?;

        Ok(self.producer.with(|producer| {
            let next_value = producer.next_value();
            let next_sequence = next_value + n;
            let wrap_point = next_sequence - self.core.buffer_size;
            let cached_gating_sequence = producer.cached_value();

            if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
                // Let consumers see how far production got before we stall.
                self.core.cursor.set_volatile(next_value);

                let mut attempt = 0u32;
                let min_sequence = loop {
                    let min_sequence = self.core.gating_sequences.minimum(next_value);
                    if wrap_point <= min_sequence {
                        break min_sequence;
                    }
                    self.core.backoff.back_off(attempt);
                    attempt = attempt.saturating_add(1);
                };
                producer.set_cached_value(min_sequence);
            }

            producer.set_next_value(next_sequence);
            next_sequence
        }))
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        self.core.check_batch_size(n)?;

        self.producer.with(|producer| {
            if !self.has_capacity(producer, n, true) {
                return Err(DisruptorError::InsufficientCapacity);
            }
            let next_sequence = producer.next_value() + n;
            producer.set_next_value(next_sequence);
            Ok(next_sequence)
        })
    }

    fn claim(&self, sequence: i64) {
        self.producer.with(|producer| producer.set_next_value(sequence));
    }

    fn publish(&self, sequence: i64) {
        self.core.cursor.set(sequence);
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _lo: i64, hi: i64) {
        self.publish(hi);
    }

    fn is_available(&self, sequence: i64) -> bool {
        sequence <= self.core.cursor.get()
    }

    fn get_highest_published_sequence(&self, _lower_bound: i64, available_sequence: i64) -> i64 {
        available_sequence
    }

    fn gating_sequences(&self) -> &GatingSequences {
        &self.core.gating_sequences
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: &[Arc<Sequence>],
    ) -> Arc<dyn SequenceBarrier> {
        Arc::new(ProcessingSequenceBarrier::new(self, sequences_to_track))
    }
}

/// Sequencer for any number of concurrent producer threads
///
/// Claims advance the cursor with a CAS, so the cursor marks the furthest
/// *claimed* slot. Publication is tracked in `available_buffer`: entry
/// `seq & mask` holds the lap (`seq >> log2(size)`) of the last published
/// sequence in that slot, which tells consumers exactly which slots are
/// readable even when producers publish out of claim order.
pub struct MultiProducerSequencer {
    core: SequencerCore,
    gating_sequence_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
}

impl MultiProducerSequencer {
    /// Create a new multi producer sequencer
    ///
    /// # Errors
    /// `InvalidBufferSize` if `buffer_size` is not a positive power of 2
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        Self::with_backoff(buffer_size, wait_strategy, Arc::new(ParkBackoff::default()))
    }

    /// Create a sequencer with a custom back-off for full-ring waits
    pub fn with_backoff(
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
        backoff: Arc<dyn Backoff>,
    ) -> Result<Self> {
        let core = SequencerCore::new(buffer_size, wait_strategy, backoff)?;
        let available_buffer = (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();

        Ok(Self {
            index_mask: core.buffer_size - 1,
            index_shift: log2(buffer_size),
            gating_sequence_cache: Sequence::new_with_initial_value(),
            available_buffer,
            core,
        })
    }

    #[inline]
    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    #[inline]
    fn set_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].store(flag, Ordering::Release);
    }

    fn has_capacity(&self, required: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required) - self.core.buffer_size;
        let cached_gating_sequence = self.gating_sequence_cache.get();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > cursor_value {
            let min_sequence = self.core.gating_sequences.minimum(cursor_value);
            self.gating_sequence_cache.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }
}

impl std::fmt::Debug for MultiProducerSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiProducerSequencer")
            .field("core", &self.core)
            .field("gating_sequence_cache", &self.gating_sequence_cache)
            .finish_non_exhaustive()
    }
}

impl Sequencer for MultiProducerSequencer {
    fn cursor(&self) -> &Arc<Sequence> {
        &self.core.cursor
    }

    fn get_buffer_size(&self) -> usize {
        self.core.buffer_size_usize()
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.core.wait_strategy
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.has_capacity(required_capacity, self.core.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.core.cursor.get();
        let consumed = self.core.gating_sequences.minimum(produced);
        self.core.buffer_size - (produced - consumed)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.core.check_batch_size(n)?;

        let mut attempt = 0u32;
        loop {
            let current = self.core.cursor.get();
            let next = current + n;
            let wrap_point = next - self.core.buffer_size;
            let cached_gating_sequence = self.gating_sequence_cache.get();

            if wrap_point > cached_gating_sequence || cached_gating_sequence > current {
                let gating_sequence = self.core.gating_sequences.minimum(current);
                if wrap_point > gating_sequence {
                    self.core.backoff.back_off(attempt);
                    attempt = attempt.saturating_add(1);
                    continue;
                }
                self.gating_sequence_cache.set(gating_sequence);
            } else if self.core.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        self.core.check_batch_size(n)?;

        loop {
            let current = self.core.cursor.get();
            let next = current + n;
            if !self.has_capacity(n, current) {
                return Err(DisruptorError::InsufficientCapacity);
            }
            if self.core.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn claim(&self, sequence: i64) {
        self.core.cursor.set(sequence);
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, lo: i64, hi: i64) {
        for sequence in lo..=hi {
            self.set_available(sequence);
        }
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].load(Ordering::Acquire) == flag
    }

    fn get_highest_published_sequence(&self, lower_bound: i64, available_sequence: i64) -> i64 {
        (lower_bound..=available_sequence)
            .find(|&sequence| !self.is_available(sequence))
            .map_or(available_sequence, |gap| gap - 1)
    }

    fn gating_sequences(&self) -> &GatingSequences {
        &self.core.gating_sequences
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: &[Arc<Sequence>],
    ) -> Arc<dyn SequenceBarrier> {
        Arc::new(ProcessingSequenceBarrier::new(self, sequences_to_track))
    }
}
