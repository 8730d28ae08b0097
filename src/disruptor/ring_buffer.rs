//! Ring Buffer Implementation
//!
//! The sequencing core never owns event storage; processors read slots
//! through the `DataProvider` boundary. `RingBuffer<T>` is the reference
//! storage: a pre-allocated array indexed by `sequence & mask`.
//! `EventPublisher` pairs it with a sequencer to run the claim, write, publish
//! cycle.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disruptor::{checked_buffer_size, DisruptorError, Result, Sequencer};

/// Read access to event slots by sequence
pub trait DataProvider<T>: Send + Sync {
    fn get(&self, sequence: i64) -> &T;
}

/// Creates the events that pre-populate a ring
pub trait EventFactory<T>: Send + Sync {
    fn new_instance(&self) -> T;
}

impl<T, F> EventFactory<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn new_instance(&self) -> T {
        self()
    }
}

/// Pre-allocated slot storage
#[derive(Debug)]
pub struct RingBuffer<T> {
    /// `Box<[UnsafeCell<T>]>` keeps the slots contiguous with no spare capacity
    slots: Box<[UnsafeCell<T>]>,
    index_mask: i64,
}

impl<T> RingBuffer<T> {
    /// Create a ring of `buffer_size` events made by `event_factory`
    ///
    /// # Errors
    /// `InvalidBufferSize` if `buffer_size` is not a positive power of 2
    pub fn new<F>(buffer_size: usize, event_factory: F) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let size = checked_buffer_size(buffer_size)?;

        let slots: Box<[UnsafeCell<T>]> = (0..buffer_size)
            .map(|_| UnsafeCell::new(event_factory.new_instance()))
            .collect();

        Ok(Self {
            slots,
            index_mask: size - 1,
        })
    }

    #[inline]
    fn slot(&self, sequence: i64) -> &UnsafeCell<T> {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: masking keeps the index below `slots.len()`.
        unsafe { self.slots.get_unchecked(index) }
    }

    /// Shared reference to the event at `sequence`
    ///
    /// Only meaningful for published sequences the caller's barrier allows.
    #[inline]
    pub fn get(&self, sequence: i64) -> &T {
        // SAFETY: a published slot is only written again after every gating
        // consumer has moved past it.
        unsafe { &*self.slot(sequence).get() }
    }

    /// Exclusive reference to the event at `sequence`
    pub fn get_mut(&mut self, sequence: i64) -> &mut T {
        let index = (sequence & self.index_mask) as usize;
        self.slots[index].get_mut()
    }

    /// Raw pointer to the event at `sequence` for the producer that claimed it
    ///
    /// # Safety
    /// The caller must hold an unpublished claim on `sequence` and must not
    /// create any other reference to the slot until it is published.
    #[inline]
    pub unsafe fn get_mut_unchecked(&self, sequence: i64) -> *mut T {
        self.slot(sequence).get()
    }

    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }
}

// SAFETY: slot access is coordinated by sequencers: a slot is written only by
// the producer holding its claim and read only after it is published.
unsafe impl<T: Send + Sync> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T> DataProvider<T> for RingBuffer<T>
where
    T: Send + Sync,
{
    fn get(&self, sequence: i64) -> &T {
        RingBuffer::get(self, sequence)
    }
}

/// Publishes `[lo, hi]` when dropped, so a panicking writer cannot leave a
/// claimed slot unpublished and stall every consumer behind it
struct PublishOnDrop<'a> {
    sequencer: &'a dyn Sequencer,
    lo: i64,
    hi: i64,
}

impl Drop for PublishOnDrop<'_> {
    fn drop(&mut self) {
        self.sequencer.publish_range(self.lo, self.hi);
    }
}

/// Claim, write, publish helper over a ring and its sequencer
///
/// Cloning is cheap. With a `SingleProducerSequencer` all clones together
/// still form the one producer and must not publish concurrently.
pub struct EventPublisher<T> {
    ring_buffer: Arc<RingBuffer<T>>,
    sequencer: Arc<dyn Sequencer>,
    running: Option<Arc<AtomicBool>>,
}

impl<T> Clone for EventPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            ring_buffer: Arc::clone(&self.ring_buffer),
            sequencer: Arc::clone(&self.sequencer),
            running: self.running.clone(),
        }
    }
}

impl<T> EventPublisher<T> {
    /// # Errors
    /// `InvalidArgument` if the ring and sequencer sizes differ
    pub fn new(ring_buffer: Arc<RingBuffer<T>>, sequencer: Arc<dyn Sequencer>) -> Result<Self> {
        if ring_buffer.buffer_size() != sequencer.get_buffer_size() {
            return Err(DisruptorError::InvalidArgument(format!(
                "ring buffer size {} does not match sequencer size {}",
                ring_buffer.buffer_size(),
                sequencer.get_buffer_size()
            )));
        }
        Ok(Self {
            ring_buffer,
            sequencer,
            running: None,
        })
    }

    /// Refuse to publish while `running` is false
    pub(crate) fn gated_on(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    fn check_running(&self) -> Result<()> {
        match &self.running {
            Some(running) if !running.load(Ordering::Acquire) => Err(
                DisruptorError::IllegalState("publishing to a halted pipeline".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn write_and_publish<F>(&self, sequence: i64, writer: F) -> i64
    where
        F: FnOnce(&mut T, i64),
    {
        let _publish = PublishOnDrop {
            sequencer: self.sequencer.as_ref(),
            lo: sequence,
            hi: sequence,
        };
        // SAFETY: `sequence` was just claimed and is published only when
        // `_publish` drops, after the writer returns.
        let event = unsafe { &mut *self.ring_buffer.get_mut_unchecked(sequence) };
        writer(event, sequence);
        sequence
    }

    /// Claim the next slot, waiting for capacity, and fill it with `writer`
    ///
    /// # Returns
    /// The published sequence
    pub fn publish_with<F>(&self, writer: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        self.check_running()?;
        let sequence = self.sequencer.next()?;
        Ok(self.write_and_publish(sequence, writer))
    }

    /// Like `publish_with`, but fails instead of waiting for capacity
    ///
    /// # Errors
    /// `InsufficientCapacity` if the ring is full
    pub fn try_publish_with<F>(&self, writer: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        self.check_running()?;
        let sequence = self.sequencer.try_next()?;
        Ok(self.write_and_publish(sequence, writer))
    }

    /// Claim `count` slots as one batch, fill each, and publish them together
    ///
    /// `writer` receives the event, its sequence and its index within the batch.
    ///
    /// # Returns
    /// The highest published sequence
    pub fn publish_batch_with<F>(&self, count: usize, mut writer: F) -> Result<i64>
    where
        F: FnMut(&mut T, i64, usize),
    {
        self.check_running()?;
        let n = i64::try_from(count)
            .map_err(|_| DisruptorError::InvalidArgument(format!("batch too large: {count}")))?;
        let hi = self.sequencer.next_n(n)?;
        let lo = hi - (n - 1);

        let _publish = PublishOnDrop {
            sequencer: self.sequencer.as_ref(),
            lo,
            hi,
        };
        for (index, sequence) in (lo..=hi).enumerate() {
            // SAFETY: the whole range is claimed and unpublished.
            let event = unsafe { &mut *self.ring_buffer.get_mut_unchecked(sequence) };
            writer(event, sequence, index);
        }
        Ok(hi)
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring_buffer
    }

    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }
}

impl<T> std::fmt::Debug for EventPublisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("buffer_size", &self.ring_buffer.buffer_size())
            .field("sequencer", &self.sequencer)
            .finish_non_exhaustive()
    }
}
