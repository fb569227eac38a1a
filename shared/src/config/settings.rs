//! Fetcher settings.
//!
//! Handles loading fetcher tuning from environment variables with sensible defaults.

use thiserror::Error;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A variable is outside its allowed range.
    #[error("{name} must be at least {min}")]
    OutOfRange {
        /// Variable name.
        name: &'static str,
        /// Smallest accepted value.
        min: u64,
    },
}

/// Fetcher tuning.
///
/// Configuration values can be set via environment variables:
/// - `LANTERN_MAX_CONCURRENT_REQUESTS`: Streaming fan-out width (default: 20)
/// - `LANTERN_GRAPH_TAIL_LIMIT`: Lines per container for graphs (default: 2000)
/// - `LANTERN_CONNECT_TIMEOUT_SECS`: Backend connect timeout (default: 120)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherSettings {
    /// Maximum number of targets read concurrently.
    pub max_concurrent_requests: usize,
    /// Lines read per container when building a graph.
    pub graph_tail_limit: i64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 20,
            graph_tail_limit: 2000,
            connect_timeout_secs: 120,
        }
    }
}

impl FetcherSettings {
    /// Loads settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a variable is set but not a positive integer.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a variable is set but not a positive integer.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let max_concurrent_requests = read(&lookup, "LANTERN_MAX_CONCURRENT_REQUESTS")?
            .unwrap_or(defaults.max_concurrent_requests as u64);
        let graph_tail_limit = read(&lookup, "LANTERN_GRAPH_TAIL_LIMIT")?
            .unwrap_or(defaults.graph_tail_limit.unsigned_abs());
        let connect_timeout_secs = read(&lookup, "LANTERN_CONNECT_TIMEOUT_SECS")?
            .unwrap_or(defaults.connect_timeout_secs);

        Ok(Self {
            max_concurrent_requests: usize::try_from(max_concurrent_requests).map_err(|_| {
                SettingsError::InvalidValue {
                    name: "LANTERN_MAX_CONCURRENT_REQUESTS",
                    value: max_concurrent_requests.to_string(),
                }
            })?,
            graph_tail_limit: i64::try_from(graph_tail_limit).map_err(|_| {
                SettingsError::InvalidValue {
                    name: "LANTERN_GRAPH_TAIL_LIMIT",
                    value: graph_tail_limit.to_string(),
                }
            })?,
            connect_timeout_secs,
        })
    }

    /// Sets the fan-out width.
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, workers: usize) -> Self {
        self.max_concurrent_requests = workers.max(1);
        self
    }
}

fn read(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, SettingsError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| SettingsError::InvalidValue {
            name,
            value: raw.clone(),
        })?;
    if value < 1 {
        return Err(SettingsError::OutOfRange { name, min: 1 });
    }
    Ok(Some(value))
}
