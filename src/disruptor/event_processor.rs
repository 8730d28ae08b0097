//! Event Processor Implementation
//!
//! An event processor owns a consumer `Sequence` and runs a loop on its own
//! thread: wait on the barrier, hand events to a callback, advance the
//! sequence. This module holds the shared lifecycle pieces (`EventProcessor`,
//! `HaltHandle`, panic isolation) and the single-consumer
//! `BatchEventProcessor`. Competing consumers live in `work_processor`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::disruptor::{
    DataProvider, DisruptorError, EventHandler, ExceptionHandler, Result, Sequence,
    SequenceBarrier,
};

const IDLE: u8 = 0;
const HALTED: u8 = 1;
const RUNNING: u8 = 2;

/// A consumer loop that runs on a dedicated thread
pub trait EventProcessor: Send {
    /// The sequence this processor advances as it completes events
    fn sequence(&self) -> Arc<Sequence>;

    /// A handle that can halt this processor from another thread
    fn halt_handle(&self) -> HaltHandle;

    /// Ask the processor to stop at its next barrier wait
    fn halt(&self) {
        self.halt_handle().halt();
    }

    fn is_running(&self) -> bool {
        self.halt_handle().is_running()
    }

    /// Run the processing loop until halted
    ///
    /// # Errors
    /// `IllegalState` if the processor is already running
    fn run(&mut self) -> Result<()>;
}

/// Cross-thread control for one processor
///
/// Cloned out of the processor before it moves onto its thread.
#[derive(Clone)]
pub struct HaltHandle {
    state: Arc<AtomicU8>,
    barrier: Arc<dyn SequenceBarrier>,
}

impl HaltHandle {
    pub(crate) fn new(barrier: Arc<dyn SequenceBarrier>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(IDLE)),
            barrier,
        }
    }

    /// Mark the processor halted and alert its barrier
    pub fn halt(&self) {
        self.state.store(HALTED, Ordering::Release);
        self.barrier.alert();
    }

    /// True from `run` entry until the loop has fully exited
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Move to running
    ///
    /// `Ok(false)` means a halt arrived before the loop started.
    pub(crate) fn try_start(&self) -> Result<bool> {
        match self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            Err(RUNNING) => Err(DisruptorError::IllegalState(
                "processor is already running".to_string(),
            )),
            Err(_) => Ok(false),
        }
    }

    pub(crate) fn should_continue(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    pub(crate) fn finish(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    /// Clear a halt that arrived while the processor was not running
    pub(crate) fn reset(&self) {
        let _ = self
            .state
            .compare_exchange(HALTED, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

impl std::fmt::Debug for HaltHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaltHandle")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("barrier", &self.barrier)
            .finish()
    }
}

/// Run a user callback, turning a panic into `HandlerPanicked`
pub(crate) fn guarded<R>(callback: impl FnOnce() -> Result<R>) -> Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => Err(DisruptorError::HandlerPanicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Single consumer that sees every event, in order, in batches
///
/// Each `wait_for` result is processed as one batch; `end_of_batch` is set on
/// its last event and the processor's sequence is advanced once per batch. A
/// failing event is reported to the exception handler, marked processed, and
/// skipped.
pub struct BatchEventProcessor<T> {
    data_provider: Arc<dyn DataProvider<T>>,
    barrier: Arc<dyn SequenceBarrier>,
    event_handler: Box<dyn EventHandler<T>>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    sequence: Arc<Sequence>,
    halt: HaltHandle,
}

impl<T> BatchEventProcessor<T> {
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        barrier: Arc<dyn SequenceBarrier>,
        event_handler: Box<dyn EventHandler<T>>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
    ) -> Self {
        Self {
            data_provider,
            halt: HaltHandle::new(Arc::clone(&barrier)),
            barrier,
            event_handler,
            exception_handler,
            sequence: Arc::new(Sequence::default()),
        }
    }

    pub fn set_exception_handler(&mut self, exception_handler: Arc<dyn ExceptionHandler<T>>) {
        self.exception_handler = exception_handler;
    }

    fn process_events(&mut self) {
        let mut next_sequence = self.sequence.get() + 1;

        loop {
            match self.barrier.wait_for(next_sequence) {
                Ok(available_sequence) => {
                    while next_sequence <= available_sequence {
                        let event = self.data_provider.get(next_sequence);
                        let end_of_batch = next_sequence == available_sequence;
                        let handler = &mut self.event_handler;
                        if let Err(error) =
                            guarded(|| handler.on_event(event, next_sequence, end_of_batch))
                        {
                            self.exception_handler.handle_event_exception(
                                &error,
                                next_sequence,
                                Some(event),
                            );
                            self.sequence.set(next_sequence);
                        }
                        next_sequence += 1;
                    }
                    // A gapped wait may report less than requested.
                    if available_sequence >= self.sequence.get() {
                        self.sequence.set(available_sequence);
                    }
                }
                Err(DisruptorError::Timeout) => self.notify_timeout(self.sequence.get()),
                Err(DisruptorError::Alert) => {
                    if !self.halt.should_continue() {
                        break;
                    }
                }
                Err(error) => {
                    self.exception_handler
                        .handle_event_exception(&error, next_sequence, None);
                    self.sequence.set(next_sequence);
                    next_sequence += 1;
                }
            }
        }
    }

    fn notify_timeout(&mut self, available_sequence: i64) {
        let handler = &mut self.event_handler;
        if let Err(error) = guarded(|| handler.on_timeout(available_sequence)) {
            self.exception_handler
                .handle_event_exception(&error, available_sequence, None);
        }
    }

    fn notify_start(&mut self) {
        let handler = &mut self.event_handler;
        if let Err(error) = guarded(|| handler.on_start()) {
            self.exception_handler.handle_on_start_exception(&error);
        }
    }

    fn notify_shutdown(&mut self) {
        let handler = &mut self.event_handler;
        if let Err(error) = guarded(|| handler.on_shutdown()) {
            self.exception_handler.handle_on_shutdown_exception(&error);
        }
    }
}

impl<T> EventProcessor for BatchEventProcessor<T> {
    fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    fn run(&mut self) -> Result<()> {
        if !self.halt.try_start()? {
            tracing::debug!("batch event processor halted before start");
            self.notify_start();
            self.notify_shutdown();
            self.halt.finish();
            return Ok(());
        }

        self.barrier.clear_alert();
        self.notify_start();
        tracing::debug!(sequence = self.sequence.get(), "batch event processor started");

        if self.halt.should_continue() {
            self.process_events();
        }

        self.notify_shutdown();
        tracing::debug!(sequence = self.sequence.get(), "batch event processor stopped");
        self.halt.finish();
        Ok(())
    }
}

impl<T> std::fmt::Debug for BatchEventProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEventProcessor")
            .field("sequence", &self.sequence)
            .field("halt", &self.halt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{
        ClosureExceptionHandler, IgnoreExceptionHandler, RingBuffer, Sequencer,
        SingleProducerSequencer, SleepingWaitStrategy,
    };
    use crate::disruptor::INITIAL_CURSOR_VALUE;
    use crossbeam::channel::{unbounded, Sender};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;
    use std::time::Duration;

    struct Recording {
        tx: Sender<(u64, i64, bool)>,
        fail_on: Option<u64>,
    }

    impl EventHandler<u64> for Recording {
        fn on_event(&mut self, event: &u64, sequence: i64, end_of_batch: bool) -> Result<()> {
            if self.fail_on == Some(*event) {
                panic!("bad event {event}");
            }
            let _ = self.tx.send((*event, sequence, end_of_batch));
            Ok(())
        }
    }

    fn pipeline(
        handler: Recording,
        exception_handler: Arc<dyn ExceptionHandler<u64>>,
    ) -> (
        Arc<SingleProducerSequencer>,
        Arc<RingBuffer<u64>>,
        BatchEventProcessor<u64>,
    ) {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(8, Arc::new(SleepingWaitStrategy::new())).unwrap(),
        );
        let ring = Arc::new(RingBuffer::new(8, || 0u64).unwrap());
        let barrier = Arc::clone(&sequencer).new_barrier(&[]);
        let processor = BatchEventProcessor::new(
            Arc::clone(&ring) as Arc<dyn DataProvider<u64>>,
            barrier,
            Box::new(handler),
            exception_handler,
        );
        sequencer.add_gating_sequences(&[processor.sequence()]);
        (sequencer, ring, processor)
    }

    #[test]
    fn test_end_of_batch_marks_last_event_of_each_wait() {
        let (tx, rx) = unbounded();
        let (sequencer, ring, mut processor) = pipeline(
            Recording { tx, fail_on: None },
            Arc::new(IgnoreExceptionHandler::new()),
        );

        // Publish 0..=2 before the consumer starts so they form one batch.
        let hi = sequencer.next_n(3).unwrap();
        for sequence in 0..=hi {
            // SAFETY: the slots are claimed and unpublished.
            unsafe { *ring.get_mut_unchecked(sequence) = sequence as u64 * 10 };
        }
        sequencer.publish_range(0, hi);

        let handle = processor.halt_handle();
        let worker = thread::spawn(move || {
            processor.run().unwrap();
            processor
        });

        let batch: Vec<_> = (0..3).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(batch, vec![(0, 0, false), (10, 1, false), (20, 2, true)]);

        handle.halt();
        let processor = worker.join().unwrap();
        assert_eq!(processor.sequence().get(), 2);
        assert!(!processor.is_running());
    }

    #[test]
    fn test_panicking_event_is_reported_and_skipped() {
        let (tx, rx) = unbounded();
        let (err_tx, err_rx) = unbounded();
        let exception_handler = ClosureExceptionHandler::new(
            move |error: &DisruptorError, sequence: i64, event: Option<&u64>| {
                let _ = err_tx.send((error.to_string(), sequence, event.copied()));
            },
        );
        let (sequencer, ring, mut processor) = pipeline(
            Recording {
                tx,
                fail_on: Some(1),
            },
            Arc::new(exception_handler),
        );
        let handle = processor.halt_handle();
        let worker = thread::spawn(move || processor.run());

        for value in 0..3u64 {
            let sequence = sequencer.next().unwrap();
            // SAFETY: the slot is claimed and unpublished.
            unsafe { *ring.get_mut_unchecked(sequence) = value };
            sequencer.publish(sequence);
        }

        assert_eq!(rx.recv().unwrap().0, 0);
        assert_eq!(rx.recv().unwrap().0, 2);
        let (message, sequence, event) = err_rx.recv().unwrap();
        assert!(message.contains("bad event 1"));
        assert_eq!((sequence, event), (1, Some(1)));

        handle.halt();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_run_twice_is_rejected_and_halt_before_start_exits() {
        let (tx, _rx) = unbounded();
        let (_sequencer, _ring, mut processor) = pipeline(
            Recording { tx, fail_on: None },
            Arc::new(IgnoreExceptionHandler::new()),
        );

        let handle = processor.halt_handle();
        handle.halt();
        // Halted before the loop started: returns without processing.
        processor.run().unwrap();
        assert!(!processor.is_running());

        let handle = processor.halt_handle();
        let worker = thread::spawn(move || {
            processor.run().unwrap();
            processor
        });
        while !handle.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        handle.halt();
        let mut processor = worker.join().unwrap();

        // A stopped processor can run again.
        let handle = processor.halt_handle();
        let worker = thread::spawn(move || processor.run());
        while !handle.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        handle.halt();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_try_start_rejects_second_start() {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(4, Arc::new(SleepingWaitStrategy::new())).unwrap(),
        );
        let handle = HaltHandle::new(sequencer.new_barrier(&[]));
        assert!(handle.try_start().unwrap());
        assert!(matches!(
            handle.try_start(),
            Err(DisruptorError::IllegalState(_))
        ));
        handle.finish();
        assert!(!handle.is_running());
    }

    /// Barrier whose storage fails a fixed number of times, then idles
    #[derive(Debug, Default)]
    struct FaultyBarrier {
        failures_left: AtomicUsize,
        alerted: AtomicBool,
    }

    impl SequenceBarrier for FaultyBarrier {
        fn wait_for(&self, _sequence: i64) -> Result<i64> {
            self.check_alert()?;
            if self
                .failures_left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DisruptorError::IllegalState("storage offline".to_string()));
            }
            thread::sleep(Duration::from_millis(1));
            Err(DisruptorError::Timeout)
        }

        fn get_cursor(&self) -> i64 {
            INITIAL_CURSOR_VALUE
        }

        fn is_alerted(&self) -> bool {
            self.alerted.load(Ordering::Acquire)
        }

        fn alert(&self) {
            self.alerted.store(true, Ordering::Release);
        }

        fn clear_alert(&self) {
            self.alerted.store(false, Ordering::Release);
        }

        fn check_alert(&self) -> Result<()> {
            if self.is_alerted() {
                Err(DisruptorError::Alert)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_wait_failures_are_reported_and_stepped_over() {
        let (err_tx, err_rx) = unbounded();
        let exception_handler = ClosureExceptionHandler::new(
            move |error: &DisruptorError, sequence: i64, event: Option<&u64>| {
                let _ = err_tx.send((error.to_string(), sequence, event.is_none()));
            },
        );
        let barrier = Arc::new(FaultyBarrier {
            failures_left: AtomicUsize::new(3),
            ..Default::default()
        });
        let (tx, _rx) = unbounded();
        let mut processor = BatchEventProcessor::new(
            Arc::new(RingBuffer::new(8, || 0u64).unwrap()) as Arc<dyn DataProvider<u64>>,
            barrier,
            Box::new(Recording { tx, fail_on: None }),
            Arc::new(exception_handler),
        );
        let sequence = processor.sequence();
        let handle = processor.halt_handle();
        let worker = thread::spawn(move || processor.run());

        let reported: Vec<_> = (0..3)
            .map(|_| err_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        for (expected, (message, sequence, no_event)) in reported.into_iter().enumerate() {
            assert!(message.contains("storage offline"));
            assert_eq!(sequence, expected as i64);
            assert!(no_event);
        }

        handle.halt();
        worker.join().unwrap().unwrap();
        assert_eq!(sequence.get(), 2);
    }

    #[test]
    fn test_reset_clears_halt_of_idle_processor() {
        let sequencer = Arc::new(
            SingleProducerSequencer::new(4, Arc::new(SleepingWaitStrategy::new())).unwrap(),
        );
        let handle = HaltHandle::new(sequencer.new_barrier(&[]));
        handle.halt();
        assert!(handle.is_running());
        handle.reset();
        assert!(!handle.is_running());
        assert!(handle.try_start().unwrap());

        // A running processor keeps its state.
        handle.reset();
        assert!(handle.should_continue());
        handle.finish();
    }

    #[test]
    fn test_guarded_converts_panics() {
        let result: Result<()> = guarded(|| panic!("kaboom"));
        assert!(matches!(result, Err(DisruptorError::HandlerPanicked(m)) if m == "kaboom"));
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
    }
}
