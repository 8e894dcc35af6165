use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MEMORY_SIZE: u32 = 65536;
pub const MAX_MEMORY_SIZE: u32 = 1 << 30;
pub const DEFAULT_TIMER_INTERVAL_MS: u32 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("memory size must be a power of 2 between 1 and 2^30, got {0}")]
    InvalidMemorySize(u32),
    #[error("steps per check must be at least 1")]
    InvalidStepsPerCheck,
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] ron::Error),
}

pub fn validate_memory_size(size: u32) -> Result<(), ConfigError> {
    if size == 0 || size > MAX_MEMORY_SIZE || !size.is_power_of_two() {
        return Err(ConfigError::InvalidMemorySize(size));
    }
    Ok(())
}

/// Machine settings, usually read from a RON file. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// bytes of data memory
    pub memory_size: u32,
    /// wall clock budget of one run batch
    pub time_slice_ms: u64,
    /// instructions between two clock checks
    pub steps_per_check: u32,
    /// how long a yielded run waits before it continues
    pub resume_delay_ms: u64,
    /// timer interval port value after a reset
    pub timer_interval_ms: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            time_slice_ms: 5,
            steps_per_check: 100,
            resume_delay_ms: 5,
            timer_interval_ms: DEFAULT_TIMER_INTERVAL_MS,
        }
    }
}

impl EmulatorConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::de::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("loading config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_memory_size(self.memory_size)?;
        if self.steps_per_check == 0 {
            return Err(ConfigError::InvalidStepsPerCheck);
        }
        Ok(())
    }
}
