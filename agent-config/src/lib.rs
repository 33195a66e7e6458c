//! Boot-time configuration of an agent container.
//!
//! Everything is read once at startup. The parent platform passes identity
//! and credentials through environment variables; gateway tunables use the
//! same mechanism so a container can be configured without flags.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod policy;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use tracing::warn;

pub use error::{ConfigError, ConfigResult};
pub use policy::ResolvePolicy;

/// Identifier of this container, assigned by the parent platform.
pub const ENV_CONTAINER_ID: &str = "CONTAINER_ID";
/// Base URL of the parent platform.
pub const ENV_PLATFORM_URL: &str = "PLATFORM_URL";
/// Bearer credential shared with the parent platform.
pub const ENV_TOKEN: &str = "TOKEN";
/// Identifier of the user that started the container.
pub const ENV_OWNER: &str = "OWNER";
/// Container-to-host port mapping, `container:host` pairs separated by commas.
pub const ENV_PORT_MAPPING: &str = "PORT_MAPPING";
/// Port the HTTP surface listens on.
pub const ENV_API_PORT: &str = "API_PORT";
/// Default invoke budget in seconds.
pub const ENV_INVOKE_TIMEOUT: &str = "INVOKE_TIMEOUT";
/// Seconds between two credential renewals.
pub const ENV_TOKEN_RENEWAL_INTERVAL: &str = "TOKEN_RENEWAL_INTERVAL";
/// Envelopes buffered per agent mailbox.
pub const ENV_MAILBOX_CAPACITY: &str = "MAILBOX_CAPACITY";
/// Tie-break for ambiguous action or stream lookups.
pub const ENV_RESOLVE_POLICY: &str = "RESOLVE_POLICY";

/// Port the HTTP surface listens on unless overridden.
pub const DEFAULT_API_PORT: u16 = 8082;
/// Invoke budget used when a caller does not supply a positive one.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Renewal period for a credential that expires after roughly ten hours.
pub const DEFAULT_TOKEN_RENEWAL_INTERVAL: Duration = Duration::from_secs(9 * 60 * 60);
/// Envelopes buffered per agent mailbox unless overridden.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Resolved container configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Container identifier.
    pub container_id: String,
    /// Parent platform base URL; `None` runs the container standalone.
    pub platform_url: Option<String>,
    /// Bearer credential; `None` disables authentication.
    pub token: Option<String>,
    /// Owner of the container.
    pub owner: Option<String>,
    /// Container port to host port.
    pub port_mapping: BTreeMap<u16, u16>,
    /// HTTP listen port.
    pub api_port: u16,
    /// Default invoke budget.
    pub invoke_timeout: Duration,
    /// Credential renewal period.
    pub token_renewal_interval: Duration,
    /// Mailbox capacity per agent.
    pub mailbox_capacity: NonZeroUsize,
    /// Tie-break for ambiguous lookups.
    pub resolve_policy: ResolvePolicy,
}

impl ContainerConfig {
    /// Standalone configuration with defaults and the given container id.
    #[must_use]
    pub fn standalone(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            platform_url: None,
            token: None,
            owner: None,
            port_mapping: BTreeMap::new(),
            api_port: DEFAULT_API_PORT,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            token_renewal_interval: DEFAULT_TOKEN_RENEWAL_INTERVAL,
            mailbox_capacity: NonZeroUsize::new(DEFAULT_MAILBOX_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            resolve_policy: ResolvePolicy::default(),
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set to an unusable value.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is set to an unusable value.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let container_id = read(ENV_CONTAINER_ID).unwrap_or_else(|| {
            let generated = uuid::Uuid::new_v4().to_string();
            warn!(container_id = %generated, "{ENV_CONTAINER_ID} not set; using a random id");
            generated
        });

        let mut config = Self::standalone(container_id);
        config.platform_url = read(ENV_PLATFORM_URL).map(|url| url.trim_end_matches('/').to_owned());
        config.token = read(ENV_TOKEN);
        config.owner = read(ENV_OWNER);

        if let Some(raw) = read(ENV_PORT_MAPPING) {
            config.port_mapping = parse_port_mapping(&raw)?;
        }
        if let Some(raw) = read(ENV_API_PORT) {
            config.api_port = parse_number(ENV_API_PORT, &raw)?;
        }
        if let Some(raw) = read(ENV_INVOKE_TIMEOUT) {
            config.invoke_timeout = Duration::from_secs(parse_positive(ENV_INVOKE_TIMEOUT, &raw)?);
        }
        if let Some(raw) = read(ENV_TOKEN_RENEWAL_INTERVAL) {
            config.token_renewal_interval =
                Duration::from_secs(parse_positive(ENV_TOKEN_RENEWAL_INTERVAL, &raw)?);
        }
        if let Some(raw) = read(ENV_MAILBOX_CAPACITY) {
            let capacity: usize = parse_number(ENV_MAILBOX_CAPACITY, &raw)?;
            config.mailbox_capacity = NonZeroUsize::new(capacity)
                .ok_or_else(|| ConfigError::invalid(ENV_MAILBOX_CAPACITY, &raw, "must be positive"))?;
        }
        if let Some(raw) = read(ENV_RESOLVE_POLICY) {
            config.resolve_policy = raw
                .parse()
                .map_err(|reason: String| ConfigError::invalid(ENV_RESOLVE_POLICY, &raw, reason))?;
        }

        Ok(config)
    }

    /// Returns `true` when a parent platform is configured.
    #[must_use]
    pub fn has_platform(&self) -> bool {
        self.platform_url.is_some()
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|err: T::Err| ConfigError::invalid(key, raw, err.to_string()))
}

fn parse_positive(key: &'static str, raw: &str) -> ConfigResult<u64> {
    match parse_number::<u64>(key, raw)? {
        0 => Err(ConfigError::invalid(key, raw, "must be positive")),
        value => Ok(value),
    }
}

fn parse_port_mapping(raw: &str) -> ConfigResult<BTreeMap<u16, u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (container, host) = pair.split_once(':').ok_or_else(|| {
                ConfigError::invalid(ENV_PORT_MAPPING, raw, format!("`{pair}` is not `container:host`"))
            })?;
            Ok((
                parse_number(ENV_PORT_MAPPING, container.trim())?,
                parse_number(ENV_PORT_MAPPING, host.trim())?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_mapping_pairs() {
        let mapping = parse_port_mapping("8082:32000, 8888:32001").unwrap();
        assert_eq!(mapping.get(&8082), Some(&32000));
        assert_eq!(mapping.get(&8888), Some(&32001));
        assert!(parse_port_mapping("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_port_pair() {
        let err = parse_port_mapping("8082-32000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_PORT_MAPPING, .. }));
    }

    #[test]
    fn zero_is_not_a_valid_timeout() {
        assert!(parse_positive(ENV_INVOKE_TIMEOUT, "0").is_err());
        assert_eq!(parse_positive(ENV_INVOKE_TIMEOUT, "5").unwrap(), 5);
    }
}
