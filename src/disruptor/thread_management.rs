//! Thread management and CPU affinity
//!
//! Every processor runs on one long-lived, named OS thread, optionally pinned
//! to a CPU core. The thread hands its processor back when it exits so a
//! halted pool can be started again.

use core_affinity::CoreId;
use std::thread::{self, JoinHandle};

use crate::disruptor::{DisruptorError, Result};

/// Handle to a processor thread
///
/// Dropping the handle joins the thread.
#[derive(Debug)]
pub struct ManagedThread<R> {
    join_handle: Option<JoinHandle<R>>,
    thread_name: String,
}

impl<R> ManagedThread<R> {
    fn new(join_handle: JoinHandle<R>, thread_name: String) -> Self {
        Self {
            join_handle: Some(join_handle),
            thread_name,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Wait for the thread and take back what it returned
    ///
    /// # Errors
    /// `IllegalState` if the thread was already joined, `HandlerPanicked` if
    /// the thread panicked
    pub fn join(mut self) -> Result<R> {
        let handle = self.join_handle.take().ok_or_else(|| {
            DisruptorError::IllegalState(format!("thread '{}' already joined", self.thread_name))
        })?;
        handle.join().map_err(|_| {
            DisruptorError::HandlerPanicked(format!("thread '{}' panicked", self.thread_name))
        })
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<R> Drop for ManagedThread<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Spawns named threads with optional CPU affinity
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    affinity: Option<CoreId>,
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the thread to `core_id`
    ///
    /// # Errors
    /// `InvalidArgument` if the core does not exist on this machine
    pub fn pin_at_core(mut self, core_id: usize) -> Result<Self> {
        validate_core_id(core_id)?;
        self.affinity = Some(CoreId { id: core_id });
        Ok(self)
    }

    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes for the new thread
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawn the thread
    ///
    /// # Errors
    /// `Io` if the OS refuses to create the thread
    pub fn spawn<F, R>(self, f: F) -> Result<ManagedThread<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let thread_name = self.name.unwrap_or_else(|| "processor".to_string());
        let affinity = self.affinity;

        let name = thread_name.clone();
        let mut builder = thread::Builder::new().name(thread_name.clone());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let join_handle = builder.spawn(move || {
            set_affinity_if_defined(affinity, &name);
            f()
        })?;

        Ok(ManagedThread::new(join_handle, thread_name))
    }
}

fn validate_core_id(core_id: usize) -> Result<()> {
    let available_cores = get_available_cores();
    if !available_cores.contains(&core_id) {
        return Err(DisruptorError::InvalidArgument(format!(
            "CPU core {core_id} is not available. Available cores: {available_cores:?}"
        )));
    }
    Ok(())
}

fn set_affinity_if_defined(affinity: Option<CoreId>, thread_name: &str) {
    if let Some(core_id) = affinity {
        if core_affinity::set_for_current(core_id) {
            tracing::debug!(thread = thread_name, core = core_id.id, "pinned thread");
        } else {
            tracing::warn!(thread = thread_name, core = core_id.id, "could not pin thread");
        }
    }
}

/// IDs of the CPU cores this process may run on
pub fn get_available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .iter()
        .map(|core| core.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_thread_builder_returns_value_on_join() {
        let barrier = Arc::new(Barrier::new(2));
        let thread_barrier = Arc::clone(&barrier);

        let managed_thread = ThreadBuilder::new()
            .thread_name("test-worker")
            .spawn(move || {
                thread_barrier.wait();
                thread::current().name().map(str::to_string)
            })
            .unwrap();

        assert_eq!(managed_thread.thread_name(), "test-worker");
        assert!(managed_thread.is_running());
        barrier.wait();

        assert_eq!(managed_thread.join().unwrap().as_deref(), Some("test-worker"));
    }

    #[test]
    fn test_default_name() {
        let managed_thread = ThreadBuilder::new().spawn(|| 1).unwrap();
        assert_eq!(managed_thread.thread_name(), "processor");
        assert_eq!(managed_thread.join().unwrap(), 1);
    }

    #[test]
    fn test_panicking_thread_is_reported() {
        let managed_thread = ThreadBuilder::new()
            .thread_name("doomed")
            .spawn(|| panic!("gone"))
            .unwrap();
        let result: Result<()> = managed_thread.join();
        assert!(matches!(result, Err(DisruptorError::HandlerPanicked(m)) if m.contains("doomed")));
    }

    #[test]
    fn test_unsatisfiable_stack_size_is_io_error() {
        let result = ThreadBuilder::new()
            .thread_name("huge-stack")
            .stack_size(1 << 60)
            .spawn(|| ());
        assert!(matches!(result, Err(DisruptorError::Io(_))));

        let managed_thread = ThreadBuilder::new()
            .stack_size(256 * 1024)
            .spawn(|| 5)
            .unwrap();
        assert_eq!(managed_thread.join().unwrap(), 5);
    }

    #[test]
    fn test_unknown_core_is_rejected() {
        assert!(matches!(
            ThreadBuilder::new().pin_at_core(usize::MAX),
            Err(DisruptorError::InvalidArgument(_))
        ));
    }

    #[test]
    #[cfg(not(miri))]
    fn test_cpu_affinity() {
        if let Some(&core_id) = get_available_cores().first() {
            let managed_thread = ThreadBuilder::new()
                .pin_at_core(core_id)
                .unwrap()
                .thread_name("affinity-test")
                .spawn(|| true)
                .unwrap();
            assert!(managed_thread.join().unwrap());
        }
    }
}
