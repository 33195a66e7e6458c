//! Observability setup for containers.
//!
//! Installs a `tracing_subscriber::fmt` subscriber whose filter honours
//! `RUST_LOG` and falls back to a configurable default directive.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

/// Default filter directive when neither `RUST_LOG` nor an explicit filter is set.
pub const DEFAULT_FILTER: &str = "info";

/// Subscriber options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    filter: Option<String>,
    default_directive: String,
    with_target: bool,
    ansi: bool,
}

impl TelemetryConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filter: None,
            default_directive: DEFAULT_FILTER.to_owned(),
            with_target: false,
            ansi: true,
        }
    }

    /// Explicit filter that takes precedence over `RUST_LOG`, e.g. `debug,hyper=warn`.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directive used when `RUST_LOG` is unset.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Prints the event target (module path) next to each line.
    #[must_use]
    pub const fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Enables or disables ANSI colours.
    #[must_use]
    pub const fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    /// Builds the filter this configuration resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] for malformed directives.
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Some(filter) = &self.filter {
            return EnvFilter::try_new(filter).map_err(|source| TelemetryError::InvalidFilter {
                filter: filter.clone(),
                source,
            });
        }
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_directive).map_err(|source| {
                TelemetryError::InvalidFilter {
                    filter: self.default_directive.clone(),
                    source,
                }
            }),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter `{filter}`: {source}")]
    InvalidFilter {
        /// The rejected directive.
        filter: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, so tests may
/// call this repeatedly.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] for malformed directives.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool, TelemetryError> {
    let filter = config.env_filter()?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing subscriber installed");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let config = TelemetryConfig::new().with_filter("debug,hyper=warn");
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn malformed_filter_is_reported() {
        let config = TelemetryConfig::new().with_filter("agent_gateway=notalevel");
        let err = config.env_filter().unwrap_err();
        assert!(err.to_string().contains("agent_gateway=notalevel"));
    }

    #[test]
    fn repeated_init_does_not_panic() {
        let config = TelemetryConfig::new().with_ansi(false);
        let _ = init_tracing(&config).unwrap();
        assert!(!init_tracing(&config).unwrap());
    }
}
