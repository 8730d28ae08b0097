//! `Ringlane` - Lock-free Sequencing Core
//!
//! The coordination machinery of a ring-buffer message passing pipeline:
//! producers claim slots of a fixed-size ring, fill them and publish; consumers
//! wait on barriers and advance their own sequences; the producer never laps
//! the slowest consumer.
//!
//! ## Components
//!
//! - **`Sequence`**: cache-line padded atomic position counter
//! - **`Sequencer`**: claims and publishes slots (`SingleProducerSequencer`,
//!   `MultiProducerSequencer`) and gates on consumer sequences
//! - **`SequenceBarrier`**: tells a consumer how far it may read
//! - **`WaitStrategy`**: how a consumer waits (blocking, yielding, busy-spin,
//!   sleeping, timeout-blocking)
//! - **`WorkerPool`**: competing consumers that each process a share of the
//!   stream, every event exactly once
//! - **`BatchEventProcessor`**: a single consumer that sees every event
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use ringlane::disruptor::{IgnoreExceptionHandler, WorkHandler, WorkerPool};
//!
//! let total = Arc::new(AtomicU64::new(0));
//! let handlers: Vec<Box<dyn WorkHandler<u64>>> = (0..2)
//!     .map(|_| {
//!         let total = Arc::clone(&total);
//!         Box::new(move |event: &u64| -> ringlane::Result<()> {
//!             total.fetch_add(*event, Ordering::Relaxed);
//!             Ok(())
//!         }) as Box<dyn WorkHandler<u64>>
//!     })
//!     .collect();
//!
//! let mut pool =
//!     WorkerPool::with_ring_buffer(1024, || 0u64, Arc::new(IgnoreExceptionHandler::new()), handlers)
//!         .unwrap();
//! pool.start().unwrap();
//!
//! let publisher = pool.publisher().unwrap();
//! for value in 1..=100u64 {
//!     publisher.publish_with(|slot, _sequence| *slot = value).unwrap();
//! }
//!
//! pool.drain_and_halt().unwrap();
//! assert_eq!(total.load(Ordering::Relaxed), 5050);
//! ```

pub mod disruptor;

// Re-export the main types for convenience
pub use disruptor::{
    is_power_of_two, BatchEventProcessor, BlockingWaitStrategy, BusySpinWaitStrategy,
    DisruptorError, EventHandler, EventProcessor, EventPublisher, ExceptionHandler,
    MultiProducerSequencer, PipelineConfig, ProducerType, Result, RingBuffer, Sequence,
    SequenceBarrier, Sequencer, SingleProducerSequencer, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, WaitStrategyKind, WorkHandler, WorkerPool,
    YieldingWaitStrategy, INITIAL_CURSOR_VALUE,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the version of the `Ringlane` library
#[must_use]
pub fn version() -> &'static str {
    VERSION
}
