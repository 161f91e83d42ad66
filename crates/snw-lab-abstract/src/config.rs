use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest payload area able to carry the header fragment's count.
pub const MIN_FRAGMENT_SIZE: usize = 8;

pub const DEFAULT_AVG_DELAY_MS: f64 = 32.0;
pub const DEFAULT_AVG_VALID_BYTES: u64 = 8 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 64;
pub const DEFAULT_FRAGMENT_SIZE: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("fragment size {0} is below the minimum of {MIN_FRAGMENT_SIZE} bytes")]
    FragmentTooSmall(usize),
}

/// Knobs shared by the noisy channel and both protocol engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    /// Poisson mean of the delay applied to every channel send. `<= 0` disables it.
    pub avg_delay_ms: f64,
    /// Bytes a direction carries between two injected bit flips. `0` disables corruption.
    pub avg_valid_bytes: u64,
    /// Sender retransmission interval.
    pub timeout_ms: u64,
    /// Payload capacity of every data packet. Both engines must agree on it.
    pub fragment_size: usize,
    /// Dump every frame taken off the channel.
    pub show_packets: bool,
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            avg_delay_ms: DEFAULT_AVG_DELAY_MS,
            avg_valid_bytes: DEFAULT_AVG_VALID_BYTES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            show_packets: false,
            seed: None,
        }
    }
}

impl SimConfig {
    /// A channel with no delay and no corruption. Handy for tests.
    pub fn ideal() -> Self {
        Self {
            avg_delay_ms: 0.0,
            avg_valid_bytes: 0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fragment_size < MIN_FRAGMENT_SIZE {
            return Err(ConfigError::FragmentTooSmall(self.fragment_size));
        }
        Ok(())
    }
}
