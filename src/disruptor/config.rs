//! Pipeline configuration
//!
//! Construction-time choices for a worker pool pipeline: ring size, producer
//! type, wait strategy and worker count. Loadable from JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::disruptor::{
    is_power_of_two, BlockingWaitStrategy, BusySpinWaitStrategy, DisruptorError, ProducerType,
    Result, Sequencer, SleepingWaitStrategy, TimeoutBlockingWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};

/// Which `WaitStrategy` to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategyKind {
    #[default]
    Blocking,
    Yielding,
    BusySpin,
    Sleeping,
    TimeoutBlocking,
}

impl WaitStrategyKind {
    /// Build the strategy
    ///
    /// # Errors
    /// `InvalidArgument` if `TimeoutBlocking` is requested without a timeout
    pub fn build(&self, timeout: Option<Duration>) -> Result<Arc<dyn WaitStrategy>> {
        let strategy: Arc<dyn WaitStrategy> = match self {
            WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::new()),
            WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy::new()),
            WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy::new()),
            WaitStrategyKind::Sleeping => Arc::new(SleepingWaitStrategy::new()),
            WaitStrategyKind::TimeoutBlocking => {
                let timeout = timeout.ok_or_else(|| {
                    DisruptorError::InvalidArgument(
                        "timeout-blocking wait strategy needs a timeout".to_string(),
                    )
                })?;
                Arc::new(TimeoutBlockingWaitStrategy::new(timeout))
            }
        };
        Ok(strategy)
    }
}

impl std::fmt::Display for WaitStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WaitStrategyKind::Blocking => "blocking",
            WaitStrategyKind::Yielding => "yielding",
            WaitStrategyKind::BusySpin => "busy-spin",
            WaitStrategyKind::Sleeping => "sleeping",
            WaitStrategyKind::TimeoutBlocking => "timeout-blocking",
        };
        f.write_str(name)
    }
}

impl FromStr for WaitStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(WaitStrategyKind::Blocking),
            "yielding" => Ok(WaitStrategyKind::Yielding),
            "busy-spin" | "busyspin" | "busy_spin" => Ok(WaitStrategyKind::BusySpin),
            "sleeping" => Ok(WaitStrategyKind::Sleeping),
            "timeout-blocking" | "timeoutblocking" | "timeout_blocking" => {
                Ok(WaitStrategyKind::TimeoutBlocking)
            }
            _ => Err(format!(
                "Invalid wait strategy: '{s}'. Valid values are: blocking, yielding, busy-spin, sleeping, timeout-blocking"
            )),
        }
    }
}

/// Settings for one worker pool pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring size; a positive power of 2
    pub buffer_size: usize,
    pub producer_type: ProducerType,
    pub wait_strategy: WaitStrategyKind,
    /// Number of competing workers
    pub workers: usize,
    /// Bound for `timeout-blocking` waits, in milliseconds
    pub timeout_ms: Option<u64>,
    /// Pin worker threads to CPU cores round-robin
    pub pin_cores: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            producer_type: ProducerType::Multi,
            wait_strategy: WaitStrategyKind::Blocking,
            workers: 4,
            timeout_ms: None,
            pin_cores: false,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; absent fields take defaults
    ///
    /// # Errors
    /// `Io` if the file cannot be read, `InvalidArgument` if it is not valid
    /// configuration JSON
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// # Errors
    /// `InvalidArgument` if `json` is not valid configuration JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DisruptorError::InvalidArgument(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `InvalidBufferSize` for a bad ring size, `InvalidArgument` for zero
    /// workers or a timeout strategy without a timeout
    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.buffer_size) {
            return Err(DisruptorError::InvalidBufferSize(self.buffer_size));
        }
        if self.workers == 0 {
            return Err(DisruptorError::InvalidArgument(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.wait_strategy == WaitStrategyKind::TimeoutBlocking && self.timeout_ms.is_none() {
            return Err(DisruptorError::InvalidArgument(
                "timeout_ms is required for the timeout-blocking wait strategy".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn build_wait_strategy(&self) -> Result<Arc<dyn WaitStrategy>> {
        self.wait_strategy.build(self.timeout())
    }

    /// Validate, then build the configured sequencer and wait strategy
    pub fn build_sequencer(&self) -> Result<Arc<dyn Sequencer>> {
        self.validate()?;
        self.producer_type
            .create_sequencer(self.buffer_size, self.build_wait_strategy()?)
    }
}
