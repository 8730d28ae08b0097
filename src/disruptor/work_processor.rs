//! Work Processor
//!
//! One worker of a `WorkerPool`. Workers share a single `work_sequence` and
//! race to claim slots from it one at a time with a CAS, so every published
//! slot is handled by exactly one worker. Each worker also owns a private
//! sequence recording its own progress, which the producer gates on.

use std::sync::Arc;

use crate::disruptor::event_processor::guarded;
use crate::disruptor::{
    DataProvider, DisruptorError, EventProcessor, EventReleaser, ExceptionHandler, HaltHandle,
    Result, Sequence, SequenceBarrier, WorkHandler,
};

/// A worker that competitively claims single slots from a shared sequence
pub struct WorkProcessor<T> {
    data_provider: Arc<dyn DataProvider<T>>,
    barrier: Arc<dyn SequenceBarrier>,
    work_handler: Box<dyn WorkHandler<T>>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    sequence: Arc<Sequence>,
    work_sequence: Arc<Sequence>,
    halt: HaltHandle,
}

impl<T> WorkProcessor<T> {
    /// Create a worker
    ///
    /// The handler receives an `EventReleaser` for this worker's sequence
    /// before the constructor returns.
    ///
    /// # Arguments
    /// * `data_provider` - Slot storage the worker reads events from
    /// * `barrier` - Barrier shared by every worker of the pool
    /// * `work_handler` - Callback for the events this worker claims
    /// * `exception_handler` - Receives callback failures
    /// * `work_sequence` - Claim counter shared by every worker of the pool
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        barrier: Arc<dyn SequenceBarrier>,
        mut work_handler: Box<dyn WorkHandler<T>>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        work_sequence: Arc<Sequence>,
    ) -> Self {
        let sequence = Arc::new(Sequence::default());
        work_handler.set_event_releaser(EventReleaser::new(Arc::clone(&sequence)));

        Self {
            data_provider,
            halt: HaltHandle::new(Arc::clone(&barrier)),
            barrier,
            work_handler,
            exception_handler,
            sequence,
            work_sequence,
        }
    }

    /// Claim the next slot from the shared work sequence
    ///
    /// The worker publishes `candidate - 1` as its own progress before the
    /// CAS, so the producer never gates on a position this worker skipped.
    fn claim_next(&self) -> i64 {
        loop {
            let next_sequence = self.work_sequence.get() + 1;
            self.sequence.set(next_sequence - 1);
            if self
                .work_sequence
                .compare_and_set(next_sequence - 1, next_sequence)
            {
                return next_sequence;
            }
        }
    }

    fn process_events(&mut self) {
        let mut processed_sequence = true;
        let mut cached_available_sequence = i64::MIN;
        let mut next_sequence = self.sequence.get();

        loop {
            if processed_sequence {
                processed_sequence = false;
                next_sequence = self.claim_next();
            }

            if cached_available_sequence >= next_sequence {
                let event = self.data_provider.get(next_sequence);
                let handler = &mut self.work_handler;
                if let Err(error) = guarded(|| handler.on_event(event)) {
                    self.exception_handler.handle_event_exception(
                        &error,
                        next_sequence,
                        Some(event),
                    );
                }
                processed_sequence = true;
                continue;
            }

            match self.barrier.wait_for(next_sequence) {
                Ok(available_sequence) => cached_available_sequence = available_sequence,
                Err(DisruptorError::Timeout) => self.notify_timeout(self.sequence.get()),
                Err(DisruptorError::Alert) => {
                    if !self.halt.should_continue() {
                        break;
                    }
                }
                Err(error) => {
                    self.exception_handler
                        .handle_event_exception(&error, next_sequence, None);
                    processed_sequence = true;
                }
            }
        }
    }

    fn notify_timeout(&mut self, available_sequence: i64) {
        let handler = &mut self.work_handler;
        if let Err(error) = guarded(|| handler.on_timeout(available_sequence)) {
            self.exception_handler
                .handle_event_exception(&error, available_sequence, None);
        }
    }

    fn notify_start(&mut self) {
        let handler = &mut self.work_handler;
        if let Err(error) = guarded(|| handler.on_start()) {
            self.exception_handler.handle_on_start_exception(&error);
        }
    }

    fn notify_shutdown(&mut self) {
        let handler = &mut self.work_handler;
        if let Err(error) = guarded(|| handler.on_shutdown()) {
            self.exception_handler.handle_on_shutdown_exception(&error);
        }
    }
}

impl<T> EventProcessor for WorkProcessor<T> {
    fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    fn run(&mut self) -> Result<()> {
        if !self.halt.try_start()? {
            tracing::debug!("work processor halted before start");
            self.notify_start();
            self.notify_shutdown();
            self.halt.finish();
            return Ok(());
        }

        self.barrier.clear_alert();
        self.notify_start();
        tracing::debug!(sequence = self.sequence.get(), "work processor started");

        if self.halt.should_continue() {
            self.process_events();
        }

        self.notify_shutdown();
        tracing::debug!(sequence = self.sequence.get(), "work processor stopped");
        self.halt.finish();
        Ok(())
    }
}

impl<T> std::fmt::Debug for WorkProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkProcessor")
            .field("sequence", &self.sequence)
            .field("work_sequence", &self.work_sequence)
            .field("halt", &self.halt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{
        IgnoreExceptionHandler, MultiProducerSequencer, RingBuffer, Sequencer,
        YieldingWaitStrategy,
    };
    use crossbeam::channel::{unbounded, Sender};
    use std::thread;

    struct Forward(Sender<u64>);

    impl WorkHandler<u64> for Forward {
        fn on_event(&mut self, event: &u64) -> Result<()> {
            if *event == 13 {
                return Err(DisruptorError::handler("unlucky"));
            }
            let _ = self.0.send(*event);
            Ok(())
        }
    }

    struct HandsOutReleaser(Sender<EventReleaser>);

    impl WorkHandler<u64> for HandsOutReleaser {
        fn on_event(&mut self, _event: &u64) -> Result<()> {
            Ok(())
        }

        fn set_event_releaser(&mut self, releaser: EventReleaser) {
            let _ = self.0.send(releaser);
        }
    }

    #[test]
    fn test_worker_claims_in_order_and_survives_handler_errors() {
        let sequencer = Arc::new(
            MultiProducerSequencer::new(16, Arc::new(YieldingWaitStrategy::new())).unwrap(),
        );
        let ring = Arc::new(RingBuffer::new(16, || 0u64).unwrap());
        let barrier = Arc::clone(&sequencer).new_barrier(&[]);
        let work_sequence = Arc::new(Sequence::default());
        let (tx, rx) = unbounded();

        let mut processor = WorkProcessor::new(
            Arc::clone(&ring) as Arc<dyn DataProvider<u64>>,
            barrier,
            Box::new(Forward(tx)),
            Arc::new(IgnoreExceptionHandler::new()),
            Arc::clone(&work_sequence),
        );
        sequencer.add_gating_sequences(&[processor.sequence(), Arc::clone(&work_sequence)]);

        let handle = processor.halt_handle();
        let worker = thread::spawn(move || {
            processor.run().unwrap();
            processor
        });

        for value in [11u64, 12, 13, 14] {
            let sequence = sequencer.next().unwrap();
            // SAFETY: the slot is claimed and unpublished.
            unsafe { *ring.get_mut_unchecked(sequence) = value };
            sequencer.publish(sequence);
        }

        let received: Vec<_> = (0..3).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(received, vec![11, 12, 14]);

        handle.halt();
        let processor = worker.join().unwrap();
        assert_eq!(work_sequence.get(), 4);
        assert_eq!(processor.sequence().get(), 3);
    }

    #[test]
    fn test_handler_receives_releaser_for_worker_sequence() {
        let sequencer = Arc::new(
            MultiProducerSequencer::new(4, Arc::new(YieldingWaitStrategy::new())).unwrap(),
        );
        let ring = Arc::new(RingBuffer::new(4, || 0u64).unwrap());
        let barrier = Arc::clone(&sequencer).new_barrier(&[]);
        let (tx, rx) = unbounded();

        let processor = WorkProcessor::new(
            ring as Arc<dyn DataProvider<u64>>,
            barrier,
            Box::new(HandsOutReleaser(tx)),
            Arc::new(IgnoreExceptionHandler::new()),
            Arc::new(Sequence::default()),
        );
        sequencer.add_gating_sequences(&[processor.sequence()]);
        sequencer.claim(2);
        assert_eq!(sequencer.get_minimum_sequence(), -1);

        rx.try_recv().unwrap().release();
        assert_eq!(processor.sequence().get(), i64::MAX);
        assert_eq!(sequencer.get_minimum_sequence(), 2);
    }
}
