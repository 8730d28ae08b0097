//! Ringlane Sequencing Core
//!
//! This module provides the lock-free coordination machinery of a ring-buffer
//! message passing pipeline: padded sequences, single- and multi-producer
//! sequencers, sequence barriers, pluggable wait strategies and a worker pool
//! that divides one stream of slots between competing consumer threads.

pub mod backoff;
pub mod config;
pub mod event_handler;
pub mod event_processor;
pub mod exception_handler;
pub mod gating;
pub mod producer_type;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequencer;
pub mod thread_management;
pub mod wait_strategy;
pub mod work_processor;
pub mod worker_pool;


pub use backoff::{Backoff, ParkBackoff, SpinYieldParkBackoff};
pub use config::{PipelineConfig, WaitStrategyKind};
pub use event_handler::{EventHandler, EventReleaser, WorkHandler};
pub use event_processor::{BatchEventProcessor, EventProcessor, HaltHandle};
pub use exception_handler::{
    ClosureExceptionHandler, DefaultExceptionHandler, ExceptionHandler, IgnoreExceptionHandler,
};
pub use gating::GatingSequences;
pub use producer_type::ProducerType;
pub use ring_buffer::{DataProvider, EventFactory, EventPublisher, RingBuffer};
pub use sequence::{get_minimum_sequence, DependentSequence, FixedSequenceGroup, Sequence};
pub use sequence_barrier::{ProcessingSequenceBarrier, SequenceBarrier};
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use thread_management::{ManagedThread, ThreadBuilder};
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};
pub use work_processor::WorkProcessor;
pub use worker_pool::WorkerPool;

/// The initial value of every cursor and consumer sequence
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors that can occur while sequencing, waiting or processing events
#[derive(Debug, thiserror::Error)]
pub enum DisruptorError {
    /// A caller passed an argument outside the accepted range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The buffer size is zero or not a power of 2
    #[error("Buffer size must be a positive power of 2, got: {0}")]
    InvalidBufferSize(usize),

    /// A non-blocking claim found too few free slots
    #[error("Insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// A halt was requested through the barrier
    #[error("Sequence barrier alerted")]
    Alert,

    /// A bounded wait elapsed before the sequence became available
    #[error("Timeout waiting for sequence")]
    Timeout,

    /// The component is not in a state that permits the operation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A user callback reported a failure
    #[error("Event handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A user callback panicked
    #[error("Event handler panicked: {0}")]
    HandlerPanicked(String),

    /// Spawning a processor thread failed
    #[error("Thread spawn failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DisruptorError {
    /// Wrap an arbitrary handler error
    pub fn handler<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        DisruptorError::Handler(error.into())
    }
}

pub type Result<T> = std::result::Result<T, DisruptorError>;

/// Utility function to check if a number is a power of 2
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Base-2 logarithm of a power of two
pub fn log2(n: usize) -> u32 {
    n.trailing_zeros()
}

/// Validate a ring size, returning it as the signed width used for sequence arithmetic
pub(crate) fn checked_buffer_size(buffer_size: usize) -> Result<i64> {
    if !is_power_of_two(buffer_size) {
        return Err(DisruptorError::InvalidBufferSize(buffer_size));
    }
    i64::try_from(buffer_size).map_err(|_| DisruptorError::InvalidBufferSize(buffer_size))
}
