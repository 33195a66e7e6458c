//! Capability snapshot submitted by an agent on every registration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ActionSpec, AgentId, Error, StreamSpec};

/// Immutable description of an agent's identity and capabilities.
///
/// A descriptor is never mutated in place: an agent that gains an action at
/// runtime builds a new snapshot (see [`AgentDescriptor::to_builder`]) and
/// registers it again, replacing the previous one wholesale.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireDescriptor", rename_all = "camelCase")]
pub struct AgentDescriptor {
    agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_type: Option<String>,
    actions: Vec<ActionSpec>,
    streams: Vec<StreamSpec>,
}

impl AgentDescriptor {
    /// Starts building an [`AgentDescriptor`].
    #[must_use]
    pub fn builder(agent_id: AgentId) -> AgentDescriptorBuilder {
        AgentDescriptorBuilder {
            agent_id,
            agent_type: None,
            actions: Vec::new(),
            streams: Vec::new(),
        }
    }

    /// Returns a builder pre-populated with this descriptor's contents.
    #[must_use]
    pub fn to_builder(&self) -> AgentDescriptorBuilder {
        AgentDescriptorBuilder {
            agent_id: self.agent_id.clone(),
            agent_type: self.agent_type.clone(),
            actions: self.actions.clone(),
            streams: self.streams.clone(),
        }
    }

    /// Returns the agent identifier.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Returns the descriptive implementation tag.
    #[must_use]
    pub fn agent_type(&self) -> Option<&str> {
        self.agent_type.as_deref()
    }

    /// Returns the declared actions in declaration order.
    #[must_use]
    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    /// Returns the declared streams in declaration order.
    #[must_use]
    pub fn streams(&self) -> &[StreamSpec] {
        &self.streams
    }

    /// Looks up an action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|action| action.name() == name)
    }

    /// Looks up a stream by name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamSpec> {
        self.streams.iter().find(|stream| stream.name() == name)
    }
}

/// Builder for [`AgentDescriptor`].
#[derive(Debug, Clone)]
pub struct AgentDescriptorBuilder {
    agent_id: AgentId,
    agent_type: Option<String>,
    actions: Vec<ActionSpec>,
    streams: Vec<StreamSpec>,
}

impl AgentDescriptorBuilder {
    /// Sets the implementation tag, e.g. `"SampleAgent"`.
    #[must_use]
    pub fn agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    /// Appends an action.
    #[must_use]
    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Appends a stream.
    #[must_use]
    pub fn stream(mut self, stream: StreamSpec) -> Self {
        self.streams.push(stream);
        self
    }

    /// Consumes the builder and returns the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when two actions or two streams
    /// share a name.
    pub fn build(self) -> crate::Result<AgentDescriptor> {
        ensure_unique("action", self.actions.iter().map(ActionSpec::name))?;
        ensure_unique("stream", self.streams.iter().map(StreamSpec::name))?;

        Ok(AgentDescriptor {
            agent_id: self.agent_id,
            agent_type: self.agent_type,
            actions: self.actions,
            streams: self.streams,
        })
    }
}

fn ensure_unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> crate::Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::descriptor(format!("duplicate {what} name `{name}`")));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDescriptor {
    agent_id: AgentId,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    actions: Vec<ActionSpec>,
    #[serde(default)]
    streams: Vec<StreamSpec>,
}

impl TryFrom<WireDescriptor> for AgentDescriptor {
    type Error = Error;

    fn try_from(wire: WireDescriptor) -> Result<Self, Self::Error> {
        AgentDescriptorBuilder {
            agent_id: wire.agent_id,
            agent_type: wire.agent_type,
            actions: wire.actions,
            streams: wire.streams,
        }
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParameterSpec, StreamMode};
    use serde_json::json;

    fn add_action() -> ActionSpec {
        ActionSpec::new("Add")
            .unwrap()
            .with_parameter("x", ParameterSpec::new("integer"))
            .with_parameter("y", ParameterSpec::new("integer"))
            .with_result(ParameterSpec::new("integer"))
    }

    #[test]
    fn builds_descriptor() {
        let descriptor = AgentDescriptor::builder(AgentId::new("sample1").unwrap())
            .agent_type("SampleAgent")
            .action(add_action())
            .stream(StreamSpec::new("GetStream", StreamMode::Get).unwrap())
            .build()
            .unwrap();

        assert_eq!(descriptor.agent_id().as_str(), "sample1");
        assert_eq!(descriptor.agent_type(), Some("SampleAgent"));
        assert!(descriptor.action("Add").is_some());
        assert!(descriptor.stream("GetStream").is_some());
        assert!(descriptor.action("Missing").is_none());
    }

    #[test]
    fn duplicate_action_names_rejected() {
        let err = AgentDescriptor::builder(AgentId::random())
            .action(add_action())
            .action(add_action())
            .build()
            .expect_err("duplicate should fail");
        assert!(matches!(err, Error::InvalidDescriptor { .. }));
    }

    #[test]
    fn rebuilt_snapshot_keeps_previous_capabilities() {
        let original = AgentDescriptor::builder(AgentId::new("sample1").unwrap())
            .action(add_action())
            .build()
            .unwrap();
        let extended = original
            .to_builder()
            .action(ActionSpec::new("Extra").unwrap())
            .build()
            .unwrap();

        assert_eq!(original.actions().len(), 1);
        assert_eq!(extended.actions().len(), 2);
        assert_eq!(extended.actions()[0], original.actions()[0]);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let value = json!({
            "agentId": "sample1",
            "agentType": "SampleAgent",
            "actions": [{ "name": "Add", "parameters": {} }],
        });
        let descriptor: AgentDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(descriptor.actions().len(), 1);
        assert!(descriptor.streams().is_empty());

        let round = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(round["agentId"], "sample1");
        assert_eq!(round["streams"], json!([]));
    }

    #[test]
    fn wire_duplicates_are_rejected() {
        let value = json!({
            "agentId": "sample1",
            "actions": [{ "name": "Add" }, { "name": "Add" }],
        });
        assert!(serde_json::from_value::<AgentDescriptor>(value).is_err());
    }
}
