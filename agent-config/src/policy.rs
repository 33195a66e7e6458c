use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which agent answers when several expose the requested action or stream
/// and the caller did not name one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvePolicy {
    /// The earliest registered match.
    #[default]
    FirstRegistered,
    /// Rotate through all matches.
    RoundRobin,
}

impl FromStr for ResolvePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "first" | "first-registered" => Ok(Self::FirstRegistered),
            "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown resolve policy `{other}`, expected `first` or `round-robin`")),
        }
    }
}

impl fmt::Display for ResolvePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstRegistered => "first-registered",
            Self::RoundRobin => "round-robin",
        })
    }
}
