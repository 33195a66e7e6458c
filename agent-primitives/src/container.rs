//! Container image metadata and the runtime info snapshot served at `/info`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentDescriptor, Error, Result};

/// Port the container API listens on unless the image declares another one.
pub const DEFAULT_API_PORT: u16 = 8082;

/// Declared description of the image a container was started from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    /// Full image name, including repository and version.
    pub image_name: String,
    /// Features this container requires from the platform.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Features this container provides.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Short readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Longer description of what the container does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Provider of the image, e.g. an institute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Port serving the container API.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Additional exposed ports.
    #[serde(default)]
    pub extra_ports: BTreeMap<u16, PortDescription>,
    /// Parameters handed to the container as environment variables.
    #[serde(default)]
    pub parameters: Vec<ImageParameter>,
}

const fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

impl ContainerImage {
    /// Creates an image description with only a name set.
    #[must_use]
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            requires: Vec::new(),
            provides: Vec::new(),
            name: None,
            version: None,
            description: None,
            provider: None,
            api_port: DEFAULT_API_PORT,
            extra_ports: BTreeMap::new(),
            parameters: Vec::new(),
        }
    }

    /// Reads an image description from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImage`] when the file cannot be read or does
    /// not contain a valid image description.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| Error::InvalidImage {
            reason: format!("failed to read {}: {err}", path.display()),
        })?;
        Self::from_json(&raw)
    }

    /// Parses an image description from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImage`] when the JSON is malformed.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| Error::InvalidImage {
            reason: err.to_string(),
        })
    }

    /// Resolves non-confidential parameters through `lookup`, falling back to
    /// declared defaults. Parameters with neither a value nor a default are
    /// omitted.
    pub fn resolve_parameters<F>(&self, lookup: F) -> BTreeMap<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.parameters
            .iter()
            .filter(|param| !param.confidential)
            .filter_map(|param| {
                lookup(&param.name)
                    .or_else(|| param.default_value.clone())
                    .map(|value| (param.name.clone(), value))
            })
            .collect()
    }
}

/// Protocol and description of an extra exposed port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    /// Protocol served on the port.
    pub protocol: String,
    /// Human-readable description of the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A parameter handed down to the container as an environment variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParameter {
    /// Environment variable name.
    pub name: String,
    /// Declared type, informational only.
    #[serde(rename = "type", default = "default_parameter_type")]
    pub type_tag: String,
    /// Whether the platform must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Confidential parameters are never exposed through `/info`.
    #[serde(default)]
    pub confidential: bool,
    /// Value used when the environment does not provide one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

fn default_parameter_type() -> String {
    "string".into()
}

/// Runtime snapshot of a container, returned by `GET /info`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Container identifier assigned by the platform.
    pub container_id: String,
    /// Image the container was started from.
    pub image: ContainerImage,
    /// Resolved non-confidential image parameters.
    pub arguments: BTreeMap<String, String>,
    /// Currently registered agents.
    pub agents: Vec<AgentDescriptor>,
    /// User who started the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// When the container was started.
    pub running_since: DateTime<Utc>,
}
