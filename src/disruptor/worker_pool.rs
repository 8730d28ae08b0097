//! Worker Pool
//!
//! A fixed set of `WorkProcessor`s sharing one barrier and one work sequence.
//! Every published slot is processed by exactly one worker. The producer
//! gates on each worker's sequence and on the work sequence, so no slot is
//! overwritten before the worker that claimed it is done.

use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::disruptor::{
    get_minimum_sequence, BlockingWaitStrategy, DataProvider, DisruptorError, EventFactory,
    EventProcessor, EventPublisher, ExceptionHandler, HaltHandle, ManagedThread,
    MultiProducerSequencer, Result, RingBuffer, Sequence, SequenceBarrier, Sequencer,
    ThreadBuilder, WorkHandler, WorkProcessor,
};

const HALT_RETRY: Duration = Duration::from_millis(1);

/// Pool of competing consumers, each on its own thread
pub struct WorkerPool<T> {
    started: Arc<AtomicBool>,
    work_sequence: Arc<Sequence>,
    sequencer: Arc<dyn Sequencer>,
    barrier: Arc<dyn SequenceBarrier>,
    sequences: Vec<Arc<Sequence>>,
    halt_handles: Vec<HaltHandle>,
    idle: Vec<WorkProcessor<T>>,
    threads: Vec<ManagedThread<Option<WorkProcessor<T>>>>,
    publisher: Option<EventPublisher<T>>,
    core_ids: Vec<usize>,
    stack_size: Option<usize>,
    thread_prefix: String,
}

impl<T> WorkerPool<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pool over existing storage and sequencing
    ///
    /// One worker is created per handler. The caller must add
    /// `worker_sequences()` to the sequencer's gating set before publishing.
    ///
    /// # Errors
    /// `InvalidArgument` if `work_handlers` is empty
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        sequencer: Arc<dyn Sequencer>,
        barrier: Arc<dyn SequenceBarrier>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        work_handlers: Vec<Box<dyn WorkHandler<T>>>,
    ) -> Result<Self> {
        if work_handlers.is_empty() {
            return Err(DisruptorError::InvalidArgument(
                "a worker pool needs at least one work handler".to_string(),
            ));
        }

        let work_sequence = Arc::new(Sequence::default());
        let idle: Vec<WorkProcessor<T>> = work_handlers
            .into_iter()
            .map(|handler| {
                WorkProcessor::new(
                    Arc::clone(&data_provider),
                    Arc::clone(&barrier),
                    handler,
                    Arc::clone(&exception_handler),
                    Arc::clone(&work_sequence),
                )
            })
            .collect();

        Ok(Self {
            started: Arc::new(AtomicBool::new(false)),
            sequences: idle.iter().map(|p| p.sequence()).collect(),
            halt_handles: idle.iter().map(|p| p.halt_handle()).collect(),
            idle,
            work_sequence,
            sequencer,
            barrier,
            threads: Vec::new(),
            publisher: None,
            core_ids: Vec::new(),
            stack_size: None,
            thread_prefix: "ringlane-worker".to_string(),
        })
    }

    /// Create a pool that owns its ring
    ///
    /// Builds a multi-producer sequencer with a blocking wait strategy and a
    /// `RingBuffer` filled by `event_factory`, and registers the workers as
    /// gating sequences. Publish through `publisher()`.
    ///
    /// # Errors
    /// `InvalidBufferSize` for a bad `buffer_size`, `InvalidArgument` if
    /// `work_handlers` is empty
    pub fn with_ring_buffer<F>(
        buffer_size: usize,
        event_factory: F,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        work_handlers: Vec<Box<dyn WorkHandler<T>>>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let sequencer: Arc<dyn Sequencer> = Arc::new(MultiProducerSequencer::new(
            buffer_size,
            Arc::new(BlockingWaitStrategy::new()),
        )?);
        let ring_buffer = Arc::new(RingBuffer::new(buffer_size, event_factory)?);
        let barrier = Arc::clone(&sequencer).new_barrier(&[]);

        let mut pool = Self::new(
            Arc::clone(&ring_buffer) as Arc<dyn DataProvider<T>>,
            Arc::clone(&sequencer),
            barrier,
            exception_handler,
            work_handlers,
        )?;
        sequencer.add_gating_sequences(&pool.worker_sequences());

        let publisher =
            EventPublisher::new(ring_buffer, sequencer)?.gated_on(Arc::clone(&pool.started));
        pool.publisher = Some(publisher);
        Ok(pool)
    }

    /// Pin worker `i` to `core_ids[i % core_ids.len()]` on the next start
    pub fn pin_to_cores(&mut self, core_ids: Vec<usize>) {
        self.core_ids = core_ids;
    }

    /// Prefix for worker thread names, suffixed with the worker index
    pub fn set_thread_prefix<S: Into<String>>(&mut self, prefix: S) {
        self.thread_prefix = prefix.into();
    }

    /// Stack size for worker threads on the next start; `None` for the default
    pub fn set_stack_size(&mut self, bytes: Option<usize>) {
        self.stack_size = bytes;
    }

    /// Every worker's sequence followed by the shared work sequence
    pub fn worker_sequences(&self) -> Vec<Arc<Sequence>> {
        let mut sequences = self.sequences.clone();
        sequences.push(Arc::clone(&self.work_sequence));
        sequences
    }

    /// Publisher for a pool built with `with_ring_buffer`
    ///
    /// Publishing fails with `IllegalState` while the pool is not running.
    ///
    /// # Errors
    /// `IllegalState` if the pool was built over external storage
    pub fn publisher(&self) -> Result<EventPublisher<T>> {
        self.publisher.clone().ok_or_else(|| {
            DisruptorError::IllegalState("worker pool does not own a ring buffer".to_string())
        })
    }

    pub fn sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }

    /// Start one thread per worker
    ///
    /// Workers begin at the current cursor, so events published before the
    /// start are not delivered.
    ///
    /// # Errors
    /// `IllegalState` if the pool is already running, `InvalidArgument` for an
    /// unknown pinned core, `Io` if a thread cannot be spawned. After a spawn
    /// failure the workers already started are halted and the pool can be
    /// started again.
    pub fn start(&mut self) -> Result<()> {
        let builders = (0..self.idle.len())
            .map(|index| self.thread_builder(index))
            .collect::<Result<Vec<_>>>()?;

        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DisruptorError::IllegalState(
                "worker pool has already been started and cannot be restarted until halted"
                    .to_string(),
            ));
        }

        let cursor = self.sequencer.get_cursor();
        self.work_sequence.set(cursor);
        for sequence in &self.sequences {
            sequence.set(cursor);
        }

        let mut pending = self.idle.drain(..).collect::<Vec<_>>().into_iter();
        for builder in builders {
            let Some(processor) = pending.next() else {
                break;
            };
            processor.halt_handle().reset();

            let handoff = Arc::new(Mutex::new(Some(processor)));
            let spawned = builder.spawn({
                let handoff = Arc::clone(&handoff);
                move || {
                    let mut processor = handoff.lock().take()?;
                    if let Err(error) = processor.run() {
                        tracing::error!(%error, "work processor exited with error");
                    }
                    Some(processor)
                }
            });

            match spawned {
                Ok(thread) => self.threads.push(thread),
                Err(error) => {
                    self.idle.extend(handoff.lock().take());
                    self.idle.extend(pending);
                    tracing::error!(%error, "worker thread spawn failed, halting pool");
                    if let Err(halt_error) = self.halt() {
                        tracing::warn!(%halt_error, "halt after failed start");
                    }
                    return Err(error);
                }
            }
        }

        tracing::info!(
            workers = self.threads.len(),
            cursor,
            "worker pool started"
        );
        Ok(())
    }

    fn thread_builder(&self, index: usize) -> Result<ThreadBuilder> {
        let mut builder =
            ThreadBuilder::new().thread_name(format!("{}-{index}", self.thread_prefix));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        if !self.core_ids.is_empty() {
            builder = builder.pin_at_core(self.core_ids[index % self.core_ids.len()])?;
        }
        Ok(builder)
    }

    /// Wait until every published event is processed, then halt
    pub fn drain_and_halt(&mut self) -> Result<()> {
        let worker_sequences = self.worker_sequences();
        while self.sequencer.get_cursor() > get_minimum_sequence(&worker_sequences, i64::MAX) {
            thread::yield_now();
        }
        self.halt()
    }

    /// Stop every worker and wait for their threads to exit
    ///
    /// Events not yet processed stay in the ring; a later `start` skips them.
    ///
    /// # Errors
    /// `HandlerPanicked` if a worker thread died; that worker is lost
    pub fn halt(&mut self) -> Result<()> {
        if self.threads.is_empty() {
            self.started.store(false, Ordering::Release);
            return Ok(());
        }

        for handle in &self.halt_handles {
            handle.halt();
        }

        let mut lost = Vec::new();
        for thread in self.threads.drain(..) {
            // A worker entering `run` late may clear the shared alert; re-raise
            // it until the thread is gone.
            while thread.is_running() {
                self.barrier.alert();
                thread::sleep(HALT_RETRY);
            }
            let name = thread.thread_name().to_string();
            match thread.join() {
                Ok(Some(processor)) => self.idle.push(processor),
                Ok(None) | Err(_) => lost.push(name),
            }
        }

        self.started.store(false, Ordering::Release);
        tracing::info!(workers = self.idle.len(), "worker pool halted");

        if lost.is_empty() {
            Ok(())
        } else {
            Err(DisruptorError::HandlerPanicked(format!(
                "worker threads died: {lost:?}"
            )))
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        for handle in &self.halt_handles {
            handle.halt();
        }
        for thread in &self.threads {
            while thread.is_running() {
                self.barrier.alert();
                thread::sleep(HALT_RETRY);
            }
        }
    }
}

impl<T> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("work_sequence", &self.work_sequence)
            .field("workers", &self.sequences.len())
            .finish_non_exhaustive()
    }
}
