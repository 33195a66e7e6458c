//! In-process message-passing runtime the containerized agents run on.
//!
//! Every agent owns a bounded FIFO mailbox drained by a dedicated `tokio`
//! task. Requests travel through the ask pattern ([`AgentRef::ask`]) and are
//! answered exactly once through a [`Responder`]; fire-and-forget traffic
//! (direct messages, topic broadcasts, credential pushes) goes through
//! [`AgentRef::tell`] and [`AgentSystem::publish`].

#![warn(missing_docs, clippy::pedantic)]

mod mailbox;
mod scheduler;
mod system;

pub use mailbox::{
    ActionError, ActionResult, Agent, ByteStream, Envelope, HandlerError, HandlerResult, Parameters,
    Reply, Request, Responder,
};
pub use scheduler::{SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler};
pub use system::{
    AgentContext, AgentRef, AgentSystem, AskError, SHUTDOWN_GRACE, SystemConfig, SystemError,
    SystemResult,
};
