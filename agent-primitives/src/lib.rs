//! Capability model shared by the container gateway, the agent runtime, and
//! the agents themselves.

#![warn(missing_docs, clippy::pedantic)]

mod capability;
mod container;
mod error;
mod ids;
mod manifest;
mod message;

/// Action, parameter, and stream descriptors.
pub use capability::{ActionSpec, ParameterSpec, StreamMode, StreamSpec};
/// Container image metadata and the runtime info snapshot.
pub use container::{ContainerImage, ContainerInfo, ImageParameter, PortDescription, DEFAULT_API_PORT};
/// Error type and result alias shared across the SDK.
pub use error::{Error, Result};
/// Unique identifier for agents hosted in a container.
pub use ids::AgentId;
/// Immutable capability snapshot submitted on every registration.
pub use manifest::{AgentDescriptor, AgentDescriptorBuilder};
/// Wire-level message and error payloads.
pub use message::{ErrorResponse, Message};
