//! Sequence Barrier Implementation
//!
//! A barrier is what a consumer waits on. It combines the sequencer's cursor,
//! the consumer's upstream dependencies, the shared wait strategy and an alert
//! flag used to interrupt waits on shutdown. For a multi-producer sequencer the
//! barrier also clips the wait result to the highest contiguously published
//! sequence, so consumers never step over an unpublished slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disruptor::{DependentSequence, DisruptorError, Result, Sequence, Sequencer};

/// Coordination barrier between a consumer and what it depends on
pub trait SequenceBarrier: Send + Sync + std::fmt::Debug {
    /// Wait for `sequence` to become available for consumption
    ///
    /// # Returns
    /// The highest sequence that may be consumed. It may exceed `sequence`,
    /// and it may be *lower* than `sequence` when the wait strategy reports
    /// progress that is still interrupted by an unpublished slot; callers then
    /// simply wait again.
    ///
    /// # Errors
    /// `Alert` if the barrier has been alerted, `Timeout` from bounded strategies
    fn wait_for(&self, sequence: i64) -> Result<i64>;

    /// Current value of the dependent sequence this barrier gates on
    fn get_cursor(&self) -> i64;

    /// Whether the barrier is in the alerted state
    fn is_alerted(&self) -> bool;

    /// Set the alert flag and wake every blocked waiter
    fn alert(&self);

    /// Clear the alert flag
    fn clear_alert(&self);

    /// # Errors
    /// `Alert` if the barrier is currently alerted
    fn check_alert(&self) -> Result<()>;
}

/// The barrier handed out by `Sequencer::new_barrier`
pub struct ProcessingSequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    cursor: Arc<Sequence>,
    dependent_sequence: DependentSequence,
    alerted: AtomicBool,
}

impl ProcessingSequenceBarrier {
    /// Create a barrier over `sequencer`'s cursor
    ///
    /// With no `dependent_sequences` the barrier gates on the cursor itself;
    /// otherwise on the slowest of the given sequences.
    pub fn new(sequencer: Arc<dyn Sequencer>, dependent_sequences: &[Arc<Sequence>]) -> Self {
        let cursor = Arc::clone(sequencer.cursor());
        let dependent_sequence = DependentSequence::new(&cursor, dependent_sequences);
        Self {
            sequencer,
            cursor,
            dependent_sequence,
            alerted: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for ProcessingSequenceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingSequenceBarrier")
            .field("cursor", &self.cursor)
            .field("dependent_sequence", &self.dependent_sequence)
            .field("alerted", &self.is_alerted())
            .finish_non_exhaustive()
    }
}

impl SequenceBarrier for ProcessingSequenceBarrier {
    fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let available_sequence = self.sequencer.wait_strategy().wait_for(
            sequence,
            &self.cursor,
            &self.dependent_sequence,
            self,
        )?;

        if available_sequence < sequence {
            return Ok(available_sequence);
        }

        Ok(self
            .sequencer
            .get_highest_published_sequence(sequence, available_sequence))
    }

    fn get_cursor(&self) -> i64 {
        self.dependent_sequence.get()
    }

    fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.sequencer.wait_strategy().signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(DisruptorError::Alert);
        }
        Ok(())
    }
}
