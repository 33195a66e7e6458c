//! Shared error definitions for agent primitives.

use thiserror::Error;

/// Result alias used throughout the capability model.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing capability model values.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided agent identifier failed validation.
    #[error("invalid agent id `{id}`: {reason}")]
    InvalidAgentId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Descriptor definition failed validation.
    #[error("invalid agent descriptor: {reason}")]
    InvalidDescriptor {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Container image description could not be loaded.
    #[error("invalid container image: {reason}")]
    InvalidImage {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

impl Error {
    pub(crate) fn descriptor(reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            reason: reason.into(),
        }
    }
}
