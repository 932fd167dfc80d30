//! Tunables for the supervisor, the worker, and the backpressure monitor.
//!
//! Every duration is (de)serialized as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::CrashPolicy;

pub const DEFAULT_CHUNK_SIZE: u64 = 500;
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PAUSE_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Memory-pressure throttle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Pause chunk production when resident memory exceeds this many bytes.
    pub memory_ceiling_bytes: u64,

    /// How often the memory signal is sampled.
    #[serde(with = "duration_millis")]
    pub sample_interval: Duration,

    /// How long a pause lasts. Pressure is not re-sampled before resuming.
    #[serde(with = "duration_millis")]
    pub pause_cooldown: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            pause_cooldown: DEFAULT_PAUSE_COOLDOWN,
        }
    }
}

impl BackpressureConfig {
    pub fn with_memory_ceiling(mut self, bytes: u64) -> Self {
        self.memory_ceiling_bytes = bytes;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_pause_cooldown(mut self, cooldown: Duration) -> Self {
        self.pause_cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sample_interval must be greater than zero".into(),
            ));
        }
        if self.memory_ceiling_bytes == 0 {
            return Err(ConfigError::Invalid(
                "memory_ceiling_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Supervisor configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shuttle_core::config::SupervisorConfig;
///
/// let config = SupervisorConfig::default()
///     .with_chunk_size(1_000)
///     .with_max_crash_requeues(3)
///     .with_dispatch_timeout(Duration::from_secs(600));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Units consumed per chunk.
    pub chunk_size: u64,

    pub backpressure: BackpressureConfig,

    /// Capacity of the worker -> supervisor event channel.
    pub event_capacity: usize,

    /// How long completed/failed tasks stay visible to `status`.
    #[serde(with = "duration_millis")]
    pub retention: Duration,

    /// Worker crashes a task may survive before it is failed. `None` = no cap.
    pub max_crash_requeues: Option<u32>,

    /// Force-replace a worker whose task has been running this long.
    #[serde(with = "option_duration_millis")]
    pub dispatch_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            backpressure: BackpressureConfig::default(),
            event_capacity: 64,
            retention: Duration::from_secs(300),
            max_crash_requeues: None,
            dispatch_timeout: None,
        }
    }
}

impl SupervisorConfig {
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_crash_requeues(mut self, max: u32) -> Self {
        self.max_crash_requeues = Some(max);
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = Some(timeout);
        self
    }

    pub fn crash_policy(&self) -> CrashPolicy {
        CrashPolicy {
            max_requeues: self.max_crash_requeues,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".into(),
            ));
        }
        if self.dispatch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid(
                "dispatch_timeout must be greater than zero when set".into(),
            ));
        }
        self.backpressure.validate()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
