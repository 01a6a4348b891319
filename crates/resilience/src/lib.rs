//! # Stratus Resilience
//!
//! Time-bounded polling for remote APIs that are only eventually consistent.
//!
//! A [`RetryStrategy`] is bounded by wall-clock time rather than by attempt
//! count: however slow or fast the remote side answers, an operation driven by
//! a strategy never runs much past `total`. The first attempt is always made
//! immediately, so calls that succeed straight away pay no latency.
//!
//! ```rust
//! use std::time::Duration;
//! use stratus_resilience::RetryStrategy;
//!
//! # async fn poll() -> bool { true }
//! # async fn example() {
//! let strategy = RetryStrategy::new(Duration::from_secs(5), Duration::from_millis(200));
//! let mut attempt = strategy.start();
//! while attempt.next().await {
//!     if poll().await {
//!         break;
//!     }
//! }
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod strategy;

pub use error::{ConfigError, ConfigResult};
pub use strategy::{Attempt, RetryStrategy};
