//! Container gateway: the registry of hosted agents, the bridge turning
//! synchronous HTTP calls into mailbox asks, the registration protocol, the
//! credential lifecycle, and the HTTP surface the parent platform talks to.

#![warn(missing_docs, clippy::pedantic)]

mod bridge;
mod containerized;
mod credential;
mod error;
mod facade;
mod lifecycle;
mod platform;
mod protocol;
mod registry;
mod server;

/// Synchronous dispatch into agent mailboxes.
pub use bridge::{DispatchBridge, PendingCall};
/// Business-logic trait and the adapter registering it with the gateway.
pub use containerized::{AgentScope, Containerized, ContainerizedAgent, spawn_containerized};
/// Bearer credential and its shared store.
pub use credential::{Credential, CredentialStore, bearer_token, secure_eq};
/// Error taxonomy and the registrable status table.
pub use error::{ErrorStatusMap, GatewayError, GatewayResult};
/// External operation set.
pub use facade::{Gateway, GatewayBuilder, REGISTRATION_WAIT};
/// Per-agent registration state machine.
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleResult, RegistrationEvent, RegistrationState, Transition};
/// Parent platform client.
pub use platform::{
    HttpParentPlatform, ParentPlatform, PlatformError, PlatformResult, SENDER_ID_HEADER, SharedPlatform,
};
/// Registration protocol handle.
pub use protocol::{Registrar, ServingFlag, Session};
/// Agent registry and lookup constraints.
pub use registry::{AgentRegistry, Target};
/// HTTP routes.
pub use server::{Rejection, router, serve};
