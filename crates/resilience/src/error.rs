//! Strategy configuration errors

use std::time::Duration;

use thiserror::Error;

/// Result type for strategy validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A retry strategy that cannot bound anything
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The total budget is zero, so no attempt window exists
    #[error("retry strategy total duration must be greater than zero")]
    ZeroTotal,

    /// Attempts would follow each other without pausing
    #[error("retry delay must be greater than zero")]
    ZeroDelay,

    /// The delay alone exceeds the whole budget, so only one attempt can ever happen
    #[error("retry delay {delay:?} exceeds total duration {total:?}")]
    DelayExceedsTotal {
        /// Configured delay between attempts
        delay: Duration,
        /// Configured total budget
        total: Duration,
    },
}
