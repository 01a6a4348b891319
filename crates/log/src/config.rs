//! Logger configuration and presets

use serde::{Deserialize, Serialize};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter directive (e.g. "info", "debug,stratus_environs=trace")
    pub filter: String,

    /// Output format
    pub format: Format,

    /// Emit ANSI colours
    pub ansi: bool,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Human-readable, multi-line
    Pretty,
    /// Compact single-line output
    Compact,
    /// Structured JSON output
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: Format::Compact,
            ansi: true,
        }
    }
}

impl Config {
    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            filter: "debug".to_string(),
            format: Format::Pretty,
            ansi: true,
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            filter: "info".to_string(),
            format: Format::Json,
            ansi: false,
        }
    }

    /// Configuration from `STRATUS_LOG` (falling back to `RUST_LOG`) and
    /// `STRATUS_LOG_FORMAT`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(filter) = lookup("STRATUS_LOG").or_else(|| lookup("RUST_LOG")) {
            config.filter = filter;
        }

        if let Some(format) = lookup("STRATUS_LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "pretty" => Format::Pretty,
                "json" => Format::Json,
                _ => Format::Compact,
            };
        }

        // Colour codes only corrupt JSON lines.
        if config.format == Format::Json {
            config.ansi = false;
        }

        config
    }
}
