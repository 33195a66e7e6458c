//! Error taxonomy of the gateway and the registrable kind-to-status table.

use std::collections::HashMap;
use std::time::Duration;

use agent_kernel::ActionError;
use agent_primitives::{AgentId, ErrorResponse};
use thiserror::Error;

/// Failure surfaced by a gateway operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// No registered agent matches the requested id, action, or stream.
    #[error("{0}")]
    NotFound(String),
    /// The presented credential does not match the current one.
    #[error("{0}")]
    Unauthorized(String),
    /// The action raised a domain failure.
    #[error("{message}")]
    Application {
        /// Failure kind reported by the agent, e.g. `application` or `io`.
        kind: String,
        /// Original description.
        message: String,
    },
    /// No answer arrived within the call's budget.
    #[error("agent {agent_id} did not reply within {after:?}")]
    Timeout {
        /// Addressed agent.
        agent_id: AgentId,
        /// Budget that expired.
        after: Duration,
    },
    /// The action asked for an explicit status code.
    #[error("{message}")]
    Custom {
        /// Status surfaced verbatim.
        status: u16,
        /// Description.
        message: String,
    },
    /// The registration handler is gone.
    #[error("{0}")]
    Unavailable(String),
    /// The request was malformed.
    #[error("{0}")]
    BadRequest(String),
}

impl GatewayError {
    /// Kind key of [`NotFound`](Self::NotFound).
    pub const NOT_FOUND: &'static str = "not_found";
    /// Kind key of [`Unauthorized`](Self::Unauthorized).
    pub const UNAUTHORIZED: &'static str = "unauthorized";
    /// Kind key of [`BadRequest`](Self::BadRequest).
    pub const BAD_REQUEST: &'static str = "bad_request";
    /// Fallback kind key of [`Application`](Self::Application).
    pub const APPLICATION: &'static str = "application";
    /// Kind key of [`Timeout`](Self::Timeout).
    pub const TIMEOUT: &'static str = "timeout";
    /// Kind key of [`Unavailable`](Self::Unavailable).
    pub const UNAVAILABLE: &'static str = "unavailable";
    /// Kind key of [`Custom`](Self::Custom).
    pub const CUSTOM: &'static str = "custom";

    /// Creates a [`GatewayError::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates an application error of the default kind.
    #[must_use]
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            kind: Self::APPLICATION.to_owned(),
            message: message.into(),
        }
    }

    /// Stable key used for status lookup.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::NotFound(_) => Self::NOT_FOUND,
            Self::Unauthorized(_) => Self::UNAUTHORIZED,
            Self::Application { kind, .. } => kind,
            Self::Timeout { .. } => Self::TIMEOUT,
            Self::Custom { .. } => Self::CUSTOM,
            Self::Unavailable(_) => Self::UNAVAILABLE,
            Self::BadRequest(_) => Self::BAD_REQUEST,
        }
    }
}

impl From<ActionError> for GatewayError {
    fn from(err: ActionError) -> Self {
        if let Some(status) = err.status() {
            return Self::Custom {
                status,
                message: err.message().to_owned(),
            };
        }
        if err.kind() == ActionError::NOT_FOUND {
            return Self::NotFound(err.message().to_owned());
        }
        Self::Application {
            kind: err.kind().to_owned(),
            message: err.message().to_owned(),
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Maps error kinds to HTTP status codes.
///
/// Unknown application kinds fall back to the `application` entry, so a new
/// failure kind only needs a [`register`](Self::register) call to get its own
/// status.
#[derive(Debug, Clone)]
pub struct ErrorStatusMap {
    codes: HashMap<String, u16>,
}

impl ErrorStatusMap {
    /// Status used when even the `application` entry is missing.
    pub const FALLBACK: u16 = 500;

    /// Associates `kind` with `status`, replacing a previous entry.
    pub fn register(&mut self, kind: impl Into<String>, status: u16) -> &mut Self {
        self.codes.insert(kind.into(), status);
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: impl Into<String>, status: u16) -> Self {
        self.register(kind, status);
        self
    }

    /// Status for `err`. Custom errors keep their own code as long as it is
    /// a valid HTTP status; anything outside `100..=999` becomes [`FALLBACK`](Self::FALLBACK).
    #[must_use]
    pub fn status_of(&self, err: &GatewayError) -> u16 {
        let status = match err {
            GatewayError::Custom { status, .. } => *status,
            _ => self
                .codes
                .get(err.kind())
                .or_else(|| self.codes.get(GatewayError::APPLICATION))
                .copied()
                .unwrap_or(Self::FALLBACK),
        };
        if (100..=999).contains(&status) {
            status
        } else {
            Self::FALLBACK
        }
    }

    /// Renders `err` into the wire body.
    #[must_use]
    pub fn render(&self, err: &GatewayError) -> ErrorResponse {
        ErrorResponse::new(self.status_of(err), err.to_string())
    }
}

impl Default for ErrorStatusMap {
    fn default() -> Self {
        let codes = [
            (GatewayError::NOT_FOUND, 404),
            (GatewayError::UNAUTHORIZED, 403),
            (GatewayError::BAD_REQUEST, 400),
            (GatewayError::APPLICATION, 500),
            (GatewayError::TIMEOUT, 500),
            (GatewayError::UNAVAILABLE, 503),
        ]
        .into_iter()
        .map(|(kind, status)| (kind.to_owned(), status))
        .collect();
        Self { codes }
    }
}
