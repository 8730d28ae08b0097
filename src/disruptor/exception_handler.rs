//! Exception Handler Implementation
//!
//! Processors never let a failing callback take their thread down. Errors and
//! caught panics are routed to an `ExceptionHandler`, and the processor moves
//! on to the next event.

use std::fmt;

use crate::disruptor::DisruptorError;

/// Receives failures from a processor's callbacks
pub trait ExceptionHandler<T>: Send + Sync {
    /// An event callback failed
    ///
    /// `event` is `None` when the failure did not come from a specific event,
    /// such as a failing `on_timeout`.
    fn handle_event_exception(&self, error: &DisruptorError, sequence: i64, event: Option<&T>);

    /// `on_start` failed; the processor still runs
    fn handle_on_start_exception(&self, error: &DisruptorError);

    /// `on_shutdown` failed
    fn handle_on_shutdown_exception(&self, error: &DisruptorError);
}

/// Logs every failure at `error` level
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionHandler;

impl DefaultExceptionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl<T: fmt::Debug> ExceptionHandler<T> for DefaultExceptionHandler {
    fn handle_event_exception(&self, error: &DisruptorError, sequence: i64, event: Option<&T>) {
        tracing::error!(%error, sequence, ?event, "exception processing event");
    }

    fn handle_on_start_exception(&self, error: &DisruptorError) {
        tracing::error!(%error, "exception during on_start");
    }

    fn handle_on_shutdown_exception(&self, error: &DisruptorError) {
        tracing::error!(%error, "exception during on_shutdown");
    }
}

/// Swallows every failure
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreExceptionHandler;

impl IgnoreExceptionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl<T> ExceptionHandler<T> for IgnoreExceptionHandler {
    fn handle_event_exception(&self, _error: &DisruptorError, _sequence: i64, _event: Option<&T>) {}

    fn handle_on_start_exception(&self, _error: &DisruptorError) {}

    fn handle_on_shutdown_exception(&self, _error: &DisruptorError) {}
}

/// Forwards event failures to a closure; lifecycle failures are logged
pub struct ClosureExceptionHandler<F> {
    on_event_exception: F,
}

impl<F> ClosureExceptionHandler<F> {
    pub fn new(on_event_exception: F) -> Self {
        Self { on_event_exception }
    }
}

impl<F> fmt::Debug for ClosureExceptionHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureExceptionHandler").finish_non_exhaustive()
    }
}

impl<T, F> ExceptionHandler<T> for ClosureExceptionHandler<F>
where
    F: Fn(&DisruptorError, i64, Option<&T>) + Send + Sync,
{
    fn handle_event_exception(&self, error: &DisruptorError, sequence: i64, event: Option<&T>) {
        (self.on_event_exception)(error, sequence, event);
    }

    fn handle_on_start_exception(&self, error: &DisruptorError) {
        tracing::warn!(%error, "exception during on_start");
    }

    fn handle_on_shutdown_exception(&self, error: &DisruptorError) {
        tracing::warn!(%error, "exception during on_shutdown");
    }
}
