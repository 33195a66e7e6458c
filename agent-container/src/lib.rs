//! Container runtime SDK facade.
//!
//! Depend on this crate via `cargo add agent-container`. It bundles the
//! runtime crates behind feature flags so a container only compiles what it
//! hosts.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use agent_primitives as primitives;

/// Mailbox runtime the agents run on (enabled by `kernel` feature).
#[cfg(feature = "kernel")]
pub use agent_kernel as kernel;

/// Registry, dispatch bridge, and HTTP surface (enabled by `gateway` feature).
#[cfg(feature = "gateway")]
pub use agent_gateway as gateway;

/// Tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use agent_telemetry as telemetry;

/// Boot-time configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use agent_config as config;
