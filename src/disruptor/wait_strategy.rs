//! Wait Strategy Implementation
//!
//! A wait strategy decides how a consumer waits for a sequence that is not yet
//! available: sleep on a condition variable, spin, yield, or back off. Every
//! strategy re-checks the barrier's alert flag while waiting, so a halt request
//! always unwinds the wait with `DisruptorError::Alert`.

use parking_lot::{Condvar, Mutex};
use std::hint;
use std::thread;
use std::time::{Duration, Instant};

use crate::disruptor::{DependentSequence, DisruptorError, Result, Sequence, SequenceBarrier};

/// Strategy for waiting for a sequence to become available
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait until `sequence` is available
    ///
    /// # Arguments
    /// * `sequence` - The sequence to wait for
    /// * `cursor` - The producer cursor
    /// * `dependent` - The sequence the consumer gates on (the cursor itself, or
    ///   the slowest upstream consumer)
    /// * `barrier` - The barrier the wait was issued through, checked for alerts
    ///
    /// # Returns
    /// The highest available sequence, which may exceed `sequence`; bounded
    /// strategies may instead fail with `Timeout`.
    ///
    /// # Errors
    /// `Alert` if the barrier was alerted, `Timeout` for bounded strategies
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64>;

    /// Wake every thread blocked in `wait_for`
    fn signal_all_when_blocking(&self);
}

/// Spin on the dependent sequence after the cursor has moved past `sequence`
#[inline]
fn spin_on_dependent(
    sequence: i64,
    dependent: &DependentSequence,
    barrier: &dyn SequenceBarrier,
) -> Result<i64> {
    loop {
        let available = dependent.get();
        if available >= sequence {
            return Ok(available);
        }
        barrier.check_alert()?;
        hint::spin_loop();
    }
}

/// Blocking wait strategy using a mutex and condition variable
///
/// Lowest CPU usage and highest wake latency. The consumer sleeps until a
/// producer publishes past `sequence`, then busy-polls the dependent sequence,
/// which lags the cursor when there is an upstream consumer.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
            }
        }

        spin_on_dependent(sequence, dependent, barrier)
    }

    fn signal_all_when_blocking(&self) {
        // The lock orders this notify after any waiter's last cursor check.
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Blocking wait strategy that gives up after a fixed timeout
///
/// Behaves like `BlockingWaitStrategy`, but fails with
/// `DisruptorError::Timeout` when the cursor has not reached `sequence`
/// within `timeout`. Processors turn the timeout into an `on_timeout` callback
/// and keep running.
#[derive(Debug)]
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let deadline = Instant::now() + self.timeout;
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                if self.condvar.wait_until(&mut guard, deadline).timed_out()
                    && cursor.get() < sequence
                {
                    return Err(DisruptorError::Timeout);
                }
            }
        }

        spin_on_dependent(sequence, dependent, barrier)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Yielding wait strategy
///
/// Spins for a fixed budget of retries, checking the alert flag each time,
/// then yields the OS thread on every further retry. Full CPU usage with
/// minimal wake latency, without starving other runnable threads.
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    /// Retries spent spinning before the strategy starts yielding
    pub const SPIN_TRIES: u32 = 100;

    pub fn new() -> Self {
        Self {
            spin_tries: Self::SPIN_TRIES,
        }
    }

    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.spin_tries;
        loop {
            let available = dependent.get();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Busy-spin wait strategy
///
/// Polls continuously with a spin-loop hint. Lowest latency, and a whole core
/// per waiting consumer; only sensible when threads are pinned.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        spin_on_dependent(sequence, dependent, barrier)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Sleeping wait strategy
///
/// Spins for the first half of its retry budget, yields for the second half,
/// then sleeps for `sleep_duration` between checks. A compromise between
/// throughput and CPU usage for consumers that can tolerate latency spikes.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    retries: u32,
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    const DEFAULT_RETRIES: u32 = 200;
    const DEFAULT_SLEEP: Duration = Duration::from_nanos(100);

    pub fn new() -> Self {
        Self {
            retries: Self::DEFAULT_RETRIES,
            sleep_duration: Self::DEFAULT_SLEEP,
        }
    }

    /// # Arguments
    /// * `retries` - Checks before the strategy starts sleeping
    /// * `sleep_duration` - How long to sleep between checks afterwards
    pub fn with_retries(retries: u32, sleep_duration: Duration) -> Self {
        Self {
            retries,
            sleep_duration,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let yield_threshold = self.retries / 2;
        let mut counter = self.retries;
        loop {
            let available = dependent.get();
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;
            if counter > yield_threshold {
                counter -= 1;
                hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                thread::sleep(self.sleep_duration);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{Sequencer, SingleProducerSequencer};
    use std::sync::Arc;

    fn fixture(
        strategy: Arc<dyn WaitStrategy>,
    ) -> (Arc<SingleProducerSequencer>, Arc<dyn SequenceBarrier>) {
        let sequencer = Arc::new(SingleProducerSequencer::new(8, strategy).unwrap());
        let barrier = Arc::clone(&sequencer).new_barrier(&[]);
        (sequencer, barrier)
    }

    fn assert_returns_when_available(strategy: Arc<dyn WaitStrategy>) {
        let (_sequencer, barrier) = fixture(Arc::clone(&strategy));
        let cursor = Sequence::new(10);
        let dependent = DependentSequence::Cursor(Arc::new(Sequence::new(10)));
        let available = strategy
            .wait_for(5, &cursor, &dependent, barrier.as_ref())
            .unwrap();
        assert_eq!(available, 10);
    }

    #[test]
    fn test_every_strategy_returns_immediately_when_available() {
        assert_returns_when_available(Arc::new(BlockingWaitStrategy::new()));
        assert_returns_when_available(Arc::new(YieldingWaitStrategy::new()));
        assert_returns_when_available(Arc::new(BusySpinWaitStrategy::new()));
        assert_returns_when_available(Arc::new(SleepingWaitStrategy::new()));
        assert_returns_when_available(Arc::new(TimeoutBlockingWaitStrategy::new(
            Duration::from_millis(10),
        )));
    }

    #[test]
    fn test_blocking_strategy_wakes_on_publish() {
        let strategy: Arc<dyn WaitStrategy> = Arc::new(BlockingWaitStrategy::new());
        let (sequencer, barrier) = fixture(Arc::clone(&strategy));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(20));
        let sequence = sequencer.next().unwrap();
        sequencer.publish(sequence);

        assert_eq!(waiter.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_blocking_strategy_unwinds_on_alert() {
        let strategy: Arc<dyn WaitStrategy> = Arc::new(BlockingWaitStrategy::new());
        let (_sequencer, barrier) = fixture(strategy);

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(20));
        barrier.alert();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(DisruptorError::Alert)
        ));
    }

    #[test]
    fn test_spinning_strategies_unwind_on_alert() {
        let strategies: Vec<Arc<dyn WaitStrategy>> = vec![
            Arc::new(YieldingWaitStrategy::new()),
            Arc::new(BusySpinWaitStrategy::new()),
            Arc::new(SleepingWaitStrategy::new()),
        ];
        for strategy in strategies {
            let (_sequencer, barrier) = fixture(strategy);
            let waiter = {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.wait_for(0))
            };
            thread::sleep(Duration::from_millis(5));
            barrier.alert();
            assert!(matches!(
                waiter.join().unwrap(),
                Err(DisruptorError::Alert)
            ));
        }
    }

    #[test]
    fn test_timeout_strategy_times_out() {
        let strategy: Arc<dyn WaitStrategy> =
            Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(10)));
        let (_sequencer, barrier) = fixture(strategy);

        let start = Instant::now();
        let result = barrier.wait_for(0);
        assert!(matches!(result, Err(DisruptorError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_yielding_strategy_waits_for_dependent_sequence() {
        let strategy = YieldingWaitStrategy::with_spin_tries(2);
        let (_sequencer, barrier) = fixture(Arc::new(strategy));
        let cursor = Sequence::new(10);
        let upstream = Arc::new(Sequence::new(3));
        let dependent = DependentSequence::Group(crate::disruptor::FixedSequenceGroup::new(&[
            Arc::clone(&upstream),
        ]));

        let advancer = {
            let upstream = Arc::clone(&upstream);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                upstream.set(6);
            })
        };

        let available = strategy
            .wait_for(5, &cursor, &dependent, barrier.as_ref())
            .unwrap();
        assert_eq!(available, 6);
        advancer.join().unwrap();
    }
}
