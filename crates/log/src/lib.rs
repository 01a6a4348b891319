//! # Stratus Log
//!
//! Subscriber setup for binaries and tests. Library crates in the workspace
//! only emit `tracing` events; whoever owns the process decides where they go.
//!
//! ```rust,no_run
//! fn main() -> Result<(), stratus_log::Error> {
//!     stratus_log::init(stratus_log::Config::from_env())?;
//!     tracing::info!(environ = "prod", "bootstrapping");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod init;

pub use config::{Config, Format};
pub use init::{init, init_test};

/// Error type for logger setup
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The filter directive could not be parsed
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        /// The rejected directive
        filter: String,
        /// Parser error
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// A global subscriber was already installed
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}
