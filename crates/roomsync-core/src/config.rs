use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default poll period in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 800;
/// Smallest accepted poll period in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
/// Largest accepted poll period in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;

/// Errors produced while building configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Numeric value outside the accepted range.
    #[error("{key}={value} is out of range {min}..={max}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    /// Value present but unusable.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    /// Required value missing.
    #[error("missing required value {0}")]
    Missing(&'static str),
}

/// Fixed period between poll ticks.
///
/// The range is enforced here so a running loop never has to re-validate it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PollInterval(u64);

impl PollInterval {
    /// Build an interval, rejecting values outside `250..=5000` ms.
    pub fn from_millis(millis: u64) -> Result<Self, ConfigError> {
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&millis) {
            return Err(ConfigError::OutOfRange {
                key: "poll_interval_ms",
                value: millis,
                min: MIN_POLL_INTERVAL_MS,
                max: MAX_POLL_INTERVAL_MS,
            });
        }
        Ok(Self(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(DEFAULT_POLL_INTERVAL_MS)
    }
}

impl TryFrom<Duration> for PollInterval {
    type Error = ConfigError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::from_millis(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }
}
