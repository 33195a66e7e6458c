//! Wire-level payloads shared by the HTTP surface and the agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque message delivered to an agent's mailbox or broadcast to a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// The actual payload.
    pub payload: Value,
    /// Optional address replies should go to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Message {
    /// Creates a message without a reply address.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            reply_to: None,
        }
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Structured failure body rendered at the HTTP boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// HTTP status code of the failure.
    pub status_code: u16,
    /// Human-readable message.
    pub message: String,
    /// Optional nested cause.
    #[serde(default)]
    pub cause: Option<Box<ErrorResponse>>,
}

impl ErrorResponse {
    /// Creates an error body without a cause.
    #[must_use]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches a nested cause.
    #[must_use]
    pub fn with_cause(mut self, cause: ErrorResponse) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}
