//! Producer Type
//!
//! Selects the sequencer algorithm at construction time.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::disruptor::{
    MultiProducerSequencer, Result, Sequencer, SingleProducerSequencer, WaitStrategy,
};

/// Whether one thread or many will claim slots
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use ringlane::disruptor::{BlockingWaitStrategy, ProducerType, Sequencer};
///
/// let producer_type: ProducerType = "multi".parse().unwrap();
/// let sequencer = producer_type
///     .create_sequencer(1024, Arc::new(BlockingWaitStrategy::new()))
///     .unwrap();
/// assert_eq!(sequencer.get_buffer_size(), 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    /// Exactly one producer thread; claims need no atomic read-modify-write
    Single,

    /// Any number of producer threads; claims CAS the cursor
    #[default]
    Multi,
}

impl ProducerType {
    pub fn is_single(&self) -> bool {
        matches!(self, ProducerType::Single)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, ProducerType::Multi)
    }

    /// Build the matching sequencer
    ///
    /// # Errors
    /// `InvalidBufferSize` if `buffer_size` is not a positive power of 2
    pub fn create_sequencer(
        &self,
        buffer_size: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Arc<dyn Sequencer>> {
        let sequencer: Arc<dyn Sequencer> = match self {
            ProducerType::Single => {
                Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy)?)
            }
            ProducerType::Multi => {
                Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy)?)
            }
        };
        Ok(sequencer)
    }
}

impl std::fmt::Display for ProducerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerType::Single => write!(f, "single"),
            ProducerType::Multi => write!(f, "multi"),
        }
    }
}

impl std::str::FromStr for ProducerType {
    type Err = String;

    /// Accepts `single` and `multi` in any case
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(ProducerType::Single),
            "multi" => Ok(ProducerType::Multi),
            _ => Err(format!(
                "Invalid producer type: '{s}'. Valid values are: single, multi"
            )),
        }
    }
}
