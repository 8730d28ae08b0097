#![allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]

//! Integration tests for claiming, publishing and consuming through barriers
//!
//! These tests drive sequencers, barriers and batch event processors together
//! across real threads.

use crossbeam::channel::{unbounded, Sender};
use ringlane::disruptor::{
    BatchEventProcessor, BlockingWaitStrategy, DataProvider, DisruptorError, EventHandler,
    EventProcessor, EventPublisher, IgnoreExceptionHandler, MultiProducerSequencer, RingBuffer,
    Sequence, SequenceBarrier, Sequencer, SingleProducerSequencer, ThreadBuilder,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};
use ringlane::Result as RinglaneResult;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct ValueEvent {
    value: i64,
}

/// Sends every event it sees to a channel
struct ChannelHandler {
    events: Sender<(i64, i64, bool)>,
    timeouts: Sender<i64>,
}

impl EventHandler<ValueEvent> for ChannelHandler {
    fn on_event(
        &mut self,
        event: &ValueEvent,
        sequence: i64,
        end_of_batch: bool,
    ) -> RinglaneResult<()> {
        let _ = self.events.send((event.value, sequence, end_of_batch));
        Ok(())
    }

    fn on_timeout(&mut self, sequence: i64) -> RinglaneResult<()> {
        let _ = self.timeouts.send(sequence);
        Ok(())
    }
}

struct Pipeline {
    publisher: EventPublisher<ValueEvent>,
    processor: BatchEventProcessor<ValueEvent>,
    events: crossbeam::channel::Receiver<(i64, i64, bool)>,
    timeouts: crossbeam::channel::Receiver<i64>,
}

fn pipeline(sequencer: Arc<dyn Sequencer>) -> Pipeline {
    let ring = Arc::new(RingBuffer::new(sequencer.get_buffer_size(), ValueEvent::default).unwrap());
    let barrier = Arc::clone(&sequencer).new_barrier(&[]);
    let (events_tx, events) = unbounded();
    let (timeouts_tx, timeouts) = unbounded();
    let processor = BatchEventProcessor::new(
        Arc::clone(&ring) as Arc<dyn DataProvider<ValueEvent>>,
        barrier,
        Box::new(ChannelHandler {
            events: events_tx,
            timeouts: timeouts_tx,
        }),
        Arc::new(IgnoreExceptionHandler::new()),
    );
    sequencer.add_gating_sequences(&[processor.sequence()]);
    Pipeline {
        publisher: EventPublisher::new(ring, sequencer).unwrap(),
        processor,
        events,
        timeouts,
    }
}

#[test]
fn test_full_ring_published_before_start_is_one_batch() {
    let sequencer: Arc<dyn Sequencer> = Arc::new(
        SingleProducerSequencer::new(8, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let Pipeline {
        publisher,
        mut processor,
        events,
        ..
    } = pipeline(sequencer);

    // Fill the whole ring before the consumer wakes.
    for value in 0..8 {
        publisher
            .publish_with(|event, _| event.value = 10 + value)
            .unwrap();
    }
    assert_eq!(publisher.sequencer().get_cursor(), 7);
    assert_eq!(publisher.sequencer().remaining_capacity(), 0);

    let halt = processor.halt_handle();
    let sequence = processor.sequence();
    let thread = ThreadBuilder::new()
        .thread_name("batch-consumer")
        .spawn(move || processor.run())
        .unwrap();

    let received: Vec<_> = (0..8)
        .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    let expected: Vec<_> = (0..8).map(|s| (10 + s, s, s == 7)).collect();
    assert_eq!(received, expected);

    halt.halt();
    thread.join().unwrap().unwrap();
    assert_eq!(sequence.get(), 7);
    assert!(!halt.is_running());
}

#[test]
fn test_try_next_fails_when_ring_is_full() {
    let sequencer = Arc::new(
        SingleProducerSequencer::new(4, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let consumer = Arc::new(Sequence::default());
    sequencer.add_gating_sequences(&[Arc::clone(&consumer)]);

    for expected in 0..4 {
        let sequence = sequencer.try_next().unwrap();
        assert_eq!(sequence, expected);
        sequencer.publish(sequence);
    }

    assert_eq!(sequencer.remaining_capacity(), 0);
    assert!(!sequencer.has_available_capacity(1));
    assert!(matches!(
        sequencer.try_next(),
        Err(DisruptorError::InsufficientCapacity)
    ));

    consumer.set(0);
    assert_eq!(sequencer.remaining_capacity(), 1);
    assert_eq!(sequencer.try_next().unwrap(), 4);
}

#[test]
fn test_barrier_reports_highest_contiguous_publication() {
    let sequencer = Arc::new(
        MultiProducerSequencer::new(16, Arc::new(YieldingWaitStrategy::new())).unwrap(),
    );
    let barrier = Arc::clone(&sequencer).new_barrier(&[]);

    let hi = sequencer.next_n(6).unwrap();
    assert_eq!(hi, 5);
    for sequence in [0, 1, 2, 4, 5] {
        sequencer.publish(sequence);
    }

    // The cursor is at 5, but slot 3 is still being written.
    assert_eq!(barrier.wait_for(0).unwrap(), 2);

    sequencer.publish(3);
    assert_eq!(barrier.wait_for(0).unwrap(), 5);
}

#[test]
fn test_concurrent_producers_claim_disjoint_sequences() {
    const PRODUCERS: usize = 4;
    const CLAIMS: usize = 2_000;

    let sequencer = Arc::new(
        MultiProducerSequencer::new(1024, Arc::new(YieldingWaitStrategy::new())).unwrap(),
    );

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let sequencer = Arc::clone(&sequencer);
            thread::spawn(move || {
                (0..CLAIMS)
                    .map(|_| {
                        let sequence = sequencer.next().unwrap();
                        sequencer.publish(sequence);
                        sequence
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for sequence in handle.join().unwrap() {
            assert!(seen.insert(sequence), "sequence {sequence} claimed twice");
        }
    }

    let total = (PRODUCERS * CLAIMS) as i64;
    assert_eq!(seen.len() as i64, total);
    assert!(seen.iter().all(|&s| (0..total).contains(&s)));
    assert_eq!(sequencer.get_cursor(), total - 1);
    assert_eq!(
        sequencer.get_highest_published_sequence(0, total - 1),
        total - 1
    );
}

#[test]
fn test_idle_consumer_receives_timeouts() {
    let strategy: Arc<dyn WaitStrategy> =
        Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(5)));
    let sequencer: Arc<dyn Sequencer> =
        Arc::new(SingleProducerSequencer::new(8, strategy).unwrap());
    let Pipeline {
        publisher,
        mut processor,
        events,
        timeouts,
    } = pipeline(sequencer);

    let halt = processor.halt_handle();
    let thread = ThreadBuilder::new()
        .spawn(move || processor.run())
        .unwrap();

    assert_eq!(timeouts.recv_timeout(Duration::from_secs(5)).unwrap(), -1);

    publisher.publish_with(|event, _| event.value = 7).unwrap();
    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)).unwrap(),
        (7, 0, true)
    );

    halt.halt();
    thread.join().unwrap().unwrap();
}

#[test]
fn test_slow_consumer_gates_producer() {
    let sequencer: Arc<dyn Sequencer> = Arc::new(
        MultiProducerSequencer::new(4, Arc::new(BlockingWaitStrategy::new())).unwrap(),
    );
    let Pipeline {
        publisher,
        mut processor,
        events,
        ..
    } = pipeline(Arc::clone(&sequencer));

    for value in 0..4 {
        publisher.publish_with(|event, _| event.value = value).unwrap();
    }
    assert!(matches!(
        publisher.try_publish_with(|event, _| event.value = 99),
        Err(DisruptorError::InsufficientCapacity)
    ));

    let producer = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            for value in 4..20 {
                publisher.publish_with(|event, _| event.value = value).unwrap();
            }
        })
    };

    let halt = processor.halt_handle();
    let thread = ThreadBuilder::new()
        .spawn(move || processor.run())
        .unwrap();

    let values: Vec<i64> = (0..20)
        .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap().0)
        .collect();
    assert_eq!(values, (0..20).collect::<Vec<_>>());

    producer.join().unwrap();
    halt.halt();
    thread.join().unwrap().unwrap();
    assert_eq!(sequencer.get_minimum_sequence(), 19);
}
