//! Global subscriber installation

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::{Config, Error, Format};

/// Install a global fmt subscriber for `config`.
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init(config: Config) -> Result<(), Error> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|source| Error::Filter {
        filter: config.filter.clone(),
        source,
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi);

    let installed = match config.format {
        Format::Pretty => builder.pretty().try_init(),
        Format::Compact => builder.compact().try_init(),
        Format::Json => builder.json().try_init(),
    };
    installed.map_err(|err| Error::AlreadyInitialized(err.to_string()))
}

/// Route events to the test harness's captured output.
///
/// Safe to call from every test; only the first call installs anything.
/// Honours `STRATUS_LOG`, defaulting to `debug`.
pub fn init_test() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_env("STRATUS_LOG").unwrap_or_else(|_| EnvFilter::new("debug"));
        // Another harness may have installed its own subscriber first.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
