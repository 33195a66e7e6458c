//! Action, parameter, and stream descriptors advertised by agents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 96;

/// Schema of a single action parameter or result.
///
/// `type` is either a primitive name (`string`, `integer`, `number`,
/// `boolean`, `array`, `object`) or the name of an object schema such as
/// `Car`. Array schemas carry a recursively typed `items` schema.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<ParameterSpec>>,
}

const fn default_required() -> bool {
    true
}

impl ParameterSpec {
    /// Creates a required parameter of the given type.
    #[must_use]
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            required: true,
            items: None,
        }
    }

    /// Creates an optional parameter of the given type.
    #[must_use]
    pub fn optional(type_tag: impl Into<String>) -> Self {
        Self::new(type_tag).with_required(false)
    }

    /// Creates a required array parameter with the given item schema.
    #[must_use]
    pub fn array(items: ParameterSpec) -> Self {
        Self {
            type_tag: "array".into(),
            required: true,
            items: Some(Box::new(items)),
        }
    }

    /// Sets the required flag.
    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Declared type tag.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Whether callers must supply this parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Item schema for array types.
    #[must_use]
    pub fn items(&self) -> Option<&ParameterSpec> {
        self.items.as_deref()
    }
}

/// Describes a remotely callable action.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<ParameterSpec>,
}

impl ActionSpec {
    /// Creates an action without parameters or declared result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if the name is empty or too long.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("action", &name)?;
        Ok(Self {
            name,
            description: None,
            parameters: BTreeMap::new(),
            result: None,
        })
    }

    /// Adds or replaces a parameter schema.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Declares the result schema.
    #[must_use]
    pub fn with_result(mut self, spec: ParameterSpec) -> Self {
        self.result = Some(spec);
        self
    }

    /// Sets an optional description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Action name, unique within one agent.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Parameter schemas keyed by parameter name.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, ParameterSpec> {
        &self.parameters
    }

    /// Declared result schema.
    #[must_use]
    pub fn result(&self) -> Option<&ParameterSpec> {
        self.result.as_ref()
    }
}

/// Direction of a stream endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamMode {
    /// The agent produces bytes.
    Get,
    /// The agent consumes bytes.
    Post,
}

/// Describes a named byte stream endpoint.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StreamSpec {
    name: String,
    mode: StreamMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl StreamSpec {
    /// Creates a stream descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if the name is empty or too long.
    pub fn new(name: impl Into<String>, mode: StreamMode) -> Result<Self> {
        let name = name.into();
        validate_name("stream", &name)?;
        Ok(Self {
            name,
            mode,
            description: None,
        })
    }

    /// Sets an optional description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream direction.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::descriptor(format!("{what} name cannot be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::descriptor(format!(
            "{what} name length must be <= {MAX_NAME_LEN}"
        )));
    }
    if name.contains('/') {
        return Err(Error::descriptor(format!(
            "{what} name `{name}` must not contain slashes"
        )));
    }
    Ok(())
}
