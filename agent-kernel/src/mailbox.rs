//! Envelopes delivered to agent mailboxes and the handler trait agents implement.

use std::fmt;
use std::pin::Pin;

use agent_primitives::Message;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::system::AgentContext;

/// Named parameters of an action invocation.
pub type Parameters = Map<String, Value>;

/// Chunked byte stream moved between the HTTP surface and an agent.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Request delivered through the ask pattern; exactly one [`Reply`] or
/// [`ActionError`] answers it.
pub enum Request {
    /// Invoke a named action.
    Invoke {
        /// Action name.
        action: String,
        /// Named parameters.
        parameters: Parameters,
    },
    /// Open a stream the agent produces.
    StreamGet {
        /// Stream name.
        stream: String,
    },
    /// Hand a byte stream to the agent.
    StreamPost {
        /// Stream name.
        stream: String,
        /// Incoming bytes, consumed by the agent.
        body: ByteStream,
    },
}

impl Request {
    /// Short label for logging, e.g. `invoke:Add`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Invoke { action, .. } => format!("invoke:{action}"),
            Self::StreamGet { stream } => format!("stream-get:{stream}"),
            Self::StreamPost { stream, .. } => format!("stream-post:{stream}"),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke { action, parameters } => f
                .debug_struct("Invoke")
                .field("action", action)
                .field("parameters", parameters)
                .finish(),
            Self::StreamGet { stream } => {
                f.debug_struct("StreamGet").field("stream", stream).finish()
            }
            Self::StreamPost { stream, .. } => f
                .debug_struct("StreamPost")
                .field("stream", stream)
                .finish_non_exhaustive(),
        }
    }
}

/// Successful answer to a [`Request`].
pub enum Reply {
    /// Structured action result.
    Value(Value),
    /// Byte stream produced by the agent.
    Stream(ByteStream),
    /// Completed without a result.
    Done,
}

impl Reply {
    /// Converts the reply into a JSON value; streams and `Done` map to `null`.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Stream(_) | Self::Done => Value::Null,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// Failure raised by an agent while answering a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    kind: String,
    message: String,
    status: Option<u16>,
}

impl ActionError {
    /// Kind of a generic domain failure.
    pub const APPLICATION: &'static str = "application";
    /// Kind of a failure caused by a missing resource.
    pub const NOT_FOUND: &'static str = "not_found";

    /// Creates a generic application error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(Self::APPLICATION, message)
    }

    /// Creates an error carrying a caller-defined kind, e.g. `io`.
    #[must_use]
    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(Self::NOT_FOUND, message)
    }

    /// Creates an error that surfaces `status` verbatim at the HTTP boundary.
    #[must_use]
    pub fn custom(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: "custom".into(),
            message: message.into(),
            status: Some(status),
        }
    }

    /// Creates the error returned when an agent does not handle a request.
    #[must_use]
    pub fn unsupported(what: impl fmt::Display) -> Self {
        Self::not_found(format!("{what} is not supported by this agent"))
    }

    /// Error kind used for status mapping.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Explicit status requested by the action, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Result alias for request handling.
pub type ActionResult<T> = Result<T, ActionError>;

/// Errors raised by fire-and-forget handlers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The agent does not react to this kind of envelope.
    #[error("{0} is not handled by this agent")]
    Unsupported(&'static str),
    /// Custom handler error with human-readable context.
    #[error("handler error: {0}")]
    Custom(String),
}

impl HandlerError {
    /// Creates a custom error variant from a string-like value.
    #[must_use]
    pub fn custom(reason: impl Into<String>) -> Self {
        Self::Custom(reason.into())
    }
}

/// Result alias for handler operations.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// One-shot reply slot handed to an agent alongside a [`Request`].
///
/// `respond` consumes the responder, so a request is answered at most once.
/// Dropping it unanswered wakes the waiter with a dropped-reply error.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<ActionResult<Reply>>,
}

impl Responder {
    /// Creates a responder and the receiver its answer arrives on.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<ActionResult<Reply>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Delivers the outcome. Returns `false` when the waiter already gave up.
    pub fn respond(self, outcome: ActionResult<Reply>) -> bool {
        self.tx.send(outcome).is_ok()
    }

    /// Returns `true` once the waiting side has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Unit of work queued in an agent's mailbox.
#[derive(Debug)]
pub enum Envelope {
    /// Request expecting exactly one answer.
    Ask {
        /// The request.
        request: Request,
        /// Where the outcome goes.
        responder: Responder,
    },
    /// Direct fire-and-forget message.
    Message(Message),
    /// Message published on a channel the agent subscribed to.
    Broadcast {
        /// Channel name.
        channel: String,
        /// Published message.
        message: Message,
    },
    /// Fresh platform credential.
    RenewToken(String),
    /// Stop processing after the envelopes queued before this one.
    Stop,
}

/// Behaviour of an agent hosted by an [`AgentSystem`](crate::AgentSystem).
///
/// Envelopes are processed strictly one at a time in mailbox order, so
/// handlers get exclusive `&mut self` access.
#[async_trait]
pub trait Agent: Send + 'static {
    /// Called once before the first envelope is processed.
    async fn started(&mut self, ctx: &AgentContext) -> HandlerResult {
        let _ = ctx;
        Ok(())
    }

    /// Answers an ask-pattern request.
    async fn handle_request(&mut self, ctx: &AgentContext, request: Request) -> ActionResult<Reply> {
        let _ = ctx;
        Err(ActionError::unsupported(request.label()))
    }

    /// Called for direct messages.
    async fn handle_message(&mut self, ctx: &AgentContext, message: Message) -> HandlerResult {
        let _ = (ctx, message);
        Err(HandlerError::Unsupported("message"))
    }

    /// Called for messages published on subscribed channels.
    async fn handle_broadcast(
        &mut self,
        ctx: &AgentContext,
        channel: &str,
        message: Message,
    ) -> HandlerResult {
        let _ = (ctx, channel, message);
        Err(HandlerError::Unsupported("broadcast"))
    }

    /// Called when the container pushes a renewed credential.
    async fn handle_renew_token(&mut self, ctx: &AgentContext, token: String) -> HandlerResult {
        let _ = (ctx, token);
        Ok(())
    }

    /// Called once after the mailbox closed, also when `started` failed.
    /// The agent's id stays taken until this returns.
    async fn stopped(&mut self, ctx: &AgentContext) {
        let _ = ctx;
    }
}

/// Short label of an envelope for log output.
pub(crate) fn envelope_label(envelope: &Envelope) -> String {
    match envelope {
        Envelope::Ask { request, .. } => request.label(),
        Envelope::Message(_) => "message".into(),
        Envelope::Broadcast { channel, .. } => format!("broadcast:{channel}"),
        Envelope::RenewToken(_) => "renew-token".into(),
        Envelope::Stop => "stop".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_delivers_once() {
        let (responder, mut rx) = Responder::channel();
        assert!(responder.respond(Ok(Reply::Value(Value::from(5)))));
        let outcome = rx.try_recv().expect("delivered").expect("ok");
        assert_eq!(outcome.into_value(), Value::from(5));
    }

    #[test]
    fn responder_reports_abandoned_waiter() {
        let (responder, rx) = Responder::channel();
        drop(rx);
        assert!(responder.is_abandoned());
        assert!(!responder.respond(Ok(Reply::Done)));
    }

    #[test]
    fn custom_errors_carry_status() {
        let err = ActionError::custom(666, "custom exception");
        assert_eq!(err.status(), Some(666));
        assert_eq!(err.to_string(), "custom exception");
    }

    #[test]
    fn unsupported_maps_to_not_found_kind() {
        let err = ActionError::unsupported("stream-get:Video");
        assert_eq!(err.kind(), ActionError::NOT_FOUND);
    }
}
