//! Session configuration.

use thiserror::Error;

use crate::timer::TimerConfig;

/// Parameters shared by every session created from the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of unacknowledged packets in flight, and the span of
    /// sequence numbers the receiver accepts ahead of its expected one.
    pub window: usize,
    pub timer: TimerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: 8,
            timer: TimerConfig::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("window size {0} does not fit the 32-bit sequence space")]
    WindowTooLarge(usize),
    #[error("timer interval must be non-zero")]
    ZeroInterval,
    #[error("max RTO ({max_ms} ms) is below the initial RTO ({initial_ms} ms)")]
    RtoRange { initial_ms: u128, max_ms: u128 },
}

impl Config {
    pub fn with_window(window: usize) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if u32::try_from(self.window).is_err() {
            return Err(ConfigError::WindowTooLarge(self.window));
        }
        if self.timer.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timer.max_rto < self.timer.initial_rto {
            return Err(ConfigError::RtoRange {
                initial_ms: self.timer.initial_rto.as_millis(),
                max_ms: self.timer.max_rto.as_millis(),
            });
        }
        Ok(())
    }
}
