//! Event handler callbacks
//!
//! `EventHandler` is the callback of a `BatchEventProcessor`: it sees every
//! published event in order. `WorkHandler` is the callback of a worker in a
//! `WorkerPool`: it sees only the events its worker won.

use std::sync::Arc;

use crate::disruptor::{Result, Sequence};

/// Callback for a consumer that processes every event in sequence order
pub trait EventHandler<T>: Send {
    /// Called for each available event
    ///
    /// # Arguments
    /// * `event` - The published event
    /// * `sequence` - Sequence of the event
    /// * `end_of_batch` - True for the last event of one `wait_for` result;
    ///   a good point to flush buffered work
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Called once on the processor thread before the first event
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once on the processor thread after the last event
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a bounded wait strategy times out
    ///
    /// `sequence` is the last sequence the processor completed.
    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }
}

impl<T, F> EventHandler<T> for F
where
    F: FnMut(&T, i64, bool) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<()> {
        self(event, sequence, end_of_batch)
    }
}

/// Callback for one worker of a `WorkerPool`
///
/// Each published event reaches exactly one worker's handler.
pub trait WorkHandler<T>: Send {
    fn on_event(&mut self, event: &T) -> Result<()>;

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_timeout(&mut self, _sequence: i64) -> Result<()> {
        Ok(())
    }

    /// Receives the worker's releaser before the worker starts
    ///
    /// Handlers that may stall for a long time keep it and call
    /// `EventReleaser::release` so the stalled worker stops holding back
    /// producers.
    fn set_event_releaser(&mut self, _releaser: EventReleaser) {}
}

impl<T, F> WorkHandler<T> for F
where
    F: FnMut(&T) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &T) -> Result<()> {
        self(event)
    }
}

/// Lets a work handler drop its worker out of the producer's gating set
#[derive(Debug, Clone)]
pub struct EventReleaser {
    sequence: Arc<Sequence>,
}

impl EventReleaser {
    pub(crate) fn new(sequence: Arc<Sequence>) -> Self {
        Self { sequence }
    }

    /// Move the worker's sequence to `i64::MAX`
    ///
    /// The worker rejoins the gating set with its next claim.
    pub fn release(&self) {
        self.sequence.set(i64::MAX);
    }
}
