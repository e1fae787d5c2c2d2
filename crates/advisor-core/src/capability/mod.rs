//! Callable capabilities
//!
//! A capability is a named function the engine may select while producing a
//! reply. Two providers exist:
//! - `DelegatedAgentCapability`: runs a nested conversation on a sub-agent
//! - `ExternalToolCapability`: calls a tool discovered from a remote catalog
//!
//! Both sit behind the `Capability` trait so dispatch never looks at where a
//! capability came from.

mod delegated;
mod external;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::AdvisorError;

pub use delegated::DelegatedAgentCapability;
pub use external::ExternalToolCapability;
pub use registry::{CapabilityGroup, CapabilityRegistry, ResolvedCapability};

/// Arguments selected by the engine, in the order the engine produced them
pub type Arguments = Map<String, Value>;

/// Where a capability comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    DelegatedAgent,
    ExternalTool,
}

/// JSON schema type of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    /// Map a JSON schema `type` value, defaulting to string for unknown types
    pub fn from_schema_type(value: Option<&str>) -> Self {
        match value {
            Some("number") => ParameterKind::Number,
            Some("integer") => ParameterKind::Integer,
            Some("boolean") => ParameterKind::Boolean,
            Some("object") => ParameterKind::Object,
            Some("array") => ParameterKind::Array,
            _ => ParameterKind::String,
        }
    }
}

/// One entry of a capability's parameter schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParameterKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Build a JSON object schema from an ordered parameter list
pub fn object_schema(parameters: &[ParameterSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in parameters {
        properties.insert(
            param.name.clone(),
            json!({"type": param.kind, "description": param.description}),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({"type": "object", "properties": properties, "required": required})
}

/// What the engine sees for each visible capability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A message produced by a capability (delegated agents answer with messages)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: Option<String>,
    pub content: String,
}

/// Result of invoking a capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityOutput {
    /// Message sequence, as returned by a delegated agent
    Messages(Vec<ChatMessage>),
    /// Raw text, as returned by an external tool
    Text(String),
    /// The capability produced nothing
    Empty,
}

impl CapabilityOutput {
    /// Textual response stored on the call record
    ///
    /// First message's content for a message sequence, the text itself for a
    /// text result, `None` when nothing was produced.
    pub fn response_text(&self) -> Option<String> {
        match self {
            CapabilityOutput::Messages(messages) => messages.first().map(|m| m.content.clone()),
            CapabilityOutput::Text(text) => Some(text.clone()),
            CapabilityOutput::Empty => None,
        }
    }

    /// Text fed back into the engine's context
    pub fn to_engine_text(&self) -> String {
        match self {
            CapabilityOutput::Messages(messages) => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            CapabilityOutput::Text(text) => text.clone(),
            CapabilityOutput::Empty => String::new(),
        }
    }
}

/// Trait for anything the engine may call
#[async_trait]
pub trait Capability: Send + Sync {
    /// Function name, unique within a registry
    fn name(&self) -> &str;

    /// Description shown to the engine
    fn description(&self) -> &str;

    /// Ordered parameter schema
    fn parameters(&self) -> &[ParameterSpec];

    fn provenance(&self) -> Provenance;

    /// JSON schema for the parameters
    fn input_schema(&self) -> Value {
        object_schema(self.parameters())
    }

    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Run the capability
    async fn invoke(
        &self,
        arguments: &Arguments,
        cancel: &CancellationToken,
    ) -> Result<CapabilityOutput, AdvisorError>;
}
