//! External tool catalog
//!
//! Tools are listed once at startup and wrapped as `ExternalToolCapability`.
//! A catalog that cannot be reached is not fatal: discovery logs the failure
//! and yields no tools.

pub mod mcp;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::capability::{Arguments, Capability, ExternalToolCapability, ParameterKind, ParameterSpec};
use crate::error::AdvisorError;

pub use mcp::{McpCatalog, McpSettings};

/// A tool advertised by a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    /// The catalog's JSON schema, passed to the engine unchanged
    pub input_schema: Value,
}

impl RemoteToolSpec {
    /// Build a tool spec from a tool's name, description and JSON schema
    pub fn from_schema(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: parameters_from_schema(&input_schema),
            input_schema,
        }
    }
}

/// Flatten an object schema's top-level properties into parameter specs
pub fn parameters_from_schema(schema: &Value) -> Vec<ParameterSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| ParameterSpec {
                    name: name.clone(),
                    kind: ParameterKind::from_schema_type(
                        property.get("type").and_then(Value::as_str),
                    ),
                    description: property
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Trait for a remote tool catalog
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// List every tool the catalog offers
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, AdvisorError>;

    /// Call a tool and return its raw text result
    async fn call_tool(&self, name: &str, arguments: &Arguments) -> Result<String, AdvisorError>;
}

/// List the catalog's tools as capabilities, or none if listing fails
pub async fn discover_capabilities(catalog: Arc<dyn ToolCatalog>) -> Vec<Arc<dyn Capability>> {
    match catalog.list_tools().await {
        Ok(tools) => {
            info!(count = tools.len(), "Discovered external tools");
            tools
                .into_iter()
                .map(|spec| {
                    Arc::new(ExternalToolCapability::new(spec, catalog.clone())) as Arc<dyn Capability>
                })
                .collect()
        }
        Err(e) => {
            let e = match e {
                AdvisorError::ToolDiscovery(_) => e,
                other => AdvisorError::ToolDiscovery(other.to_string()),
            };
            warn!(error = %e, "Continuing without external tools");
            Vec::new()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StubCatalog;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameters_from_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "usage": {"type": "string", "description": "Yearly usage"},
                "months": {"type": "integer"}
            },
            "required": ["usage"]
        });

        let params = parameters_from_schema(&schema);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "usage");
        assert!(params[0].required);
        assert_eq!(params[0].description, "Yearly usage");
        assert_eq!(params[1].kind, ParameterKind::Integer);
        assert!(!params[1].required);

        assert!(parameters_from_schema(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_discovery_wraps_tools() {
        let catalog = Arc::new(StubCatalog {
            tools: vec![
                RemoteToolSpec::from_schema("get_tariff", "Tariffs", json!({"type": "object"})),
                RemoteToolSpec::from_schema("get_usage", "Usage", json!({"type": "object"})),
            ],
            ..Default::default()
        });

        let capabilities = discover_capabilities(catalog).await;

        let names: Vec<&str> = capabilities.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["get_tariff", "get_usage"]);
    }

    #[tokio::test]
    async fn test_discovery_failure_yields_no_tools() {
        let catalog = Arc::new(StubCatalog {
            fail_listing: true,
            ..Default::default()
        });

        assert!(discover_capabilities(catalog).await.is_empty());
    }
}
