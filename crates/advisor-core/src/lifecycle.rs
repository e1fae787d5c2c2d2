//! Agent definition lifecycle
//!
//! Create, fetch and delete agent definitions on the engine. A fetched or
//! created definition is paired with the capabilities it may call to form an
//! `AgentHandle`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::capability::CapabilityRegistry;
use crate::engine::{AgentDefinition, InferenceEngine};
use crate::error::AdvisorError;

/// An agent definition bound to its engine and capabilities
#[derive(Clone)]
pub struct AgentHandle {
    definition: AgentDefinition,
    engine: Arc<dyn InferenceEngine>,
    capabilities: Arc<CapabilityRegistry>,
}

impl AgentHandle {
    pub fn new(
        definition: AgentDefinition,
        engine: Arc<dyn InferenceEngine>,
        capabilities: CapabilityRegistry,
    ) -> Self {
        Self {
            definition,
            engine,
            capabilities: Arc::new(capabilities),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("definition", &self.definition)
            .field("capabilities", &self.capabilities.names())
            .finish()
    }
}

/// Manages agent definitions on one engine
#[derive(Clone)]
pub struct LifecycleManager {
    engine: Arc<dyn InferenceEngine>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Create a new definition. Calling twice creates two definitions.
    pub async fn create(
        &self,
        name: &str,
        instructions: &str,
        model: &str,
        tools: Option<CapabilityRegistry>,
    ) -> Result<AgentHandle, AdvisorError> {
        let tools = tools.unwrap_or_default();
        let definition = self
            .engine
            .create_definition(model, name, instructions, &tools.descriptors())
            .await?;
        info!(id = %definition.id, name, capabilities = tools.len(), "Agent created");
        Ok(AgentHandle::new(definition, self.engine.clone(), tools))
    }

    /// Fetch an existing definition, failing with `NotFound` if it is absent
    pub async fn get(
        &self,
        agent_id: &str,
        tools: Option<CapabilityRegistry>,
    ) -> Result<AgentHandle, AdvisorError> {
        if agent_id.is_empty() {
            return Err(AdvisorError::NotFound("agent with empty id".into()));
        }
        let definition = self.engine.get_definition(agent_id).await?;
        info!(id = %definition.id, name = %definition.name, "Agent loaded");
        Ok(AgentHandle::new(
            definition,
            self.engine.clone(),
            tools.unwrap_or_default(),
        ))
    }

    /// Delete a definition
    ///
    /// Returns `false` for a missing or empty id instead of failing.
    pub async fn delete(&self, agent_id: Option<&str>) -> Result<bool, AdvisorError> {
        let Some(agent_id) = agent_id.filter(|id| !id.is_empty()) else {
            return Ok(false);
        };
        match self.engine.delete_definition(agent_id).await {
            Ok(deleted) => {
                info!(id = agent_id, deleted, "Agent deleted");
                Ok(deleted)
            }
            Err(e) if e.is_not_found() => {
                warn!(id = agent_id, "Agent to delete does not exist");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::StaticCapability;
    use crate::constants::groups;
    use crate::engine::scripted::ScriptedEngine;

    fn lifecycle() -> LifecycleManager {
        LifecycleManager::new(Arc::new(ScriptedEngine::new()))
    }

    #[tokio::test]
    async fn test_create_is_not_idempotent() {
        let manager = lifecycle();
        let a = manager.create("joke-agent", "jokes", "gpt-4o", None).await.unwrap();
        let b = manager.create("joke-agent", "jokes", "gpt-4o", None).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), "joke-agent");
        assert_eq!(a.definition().model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_create_attaches_tools() {
        let manager = lifecycle();
        let mut tools = CapabilityRegistry::new();
        tools.register(
            groups::EXTERNAL_TOOLS,
            vec![Arc::new(StaticCapability::new("get_tariff", "0.30"))],
        );

        let agent = manager
            .create("scenario-agent", "scenarios", "gpt-4o", Some(tools))
            .await
            .unwrap();

        assert_eq!(agent.capabilities().names(), ["get_tariff"]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let manager = lifecycle();
        let created = manager.create("a", "b", "gpt-4o", None).await.unwrap();

        let fetched = manager.get(created.id(), None).await.unwrap();
        assert_eq!(fetched.definition(), created.definition());

        assert!(manager.get("asst_missing", None).await.unwrap_err().is_not_found());
        assert!(manager.get("", None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let manager = lifecycle();
        let agent = manager.create("a", "b", "gpt-4o", None).await.unwrap();

        assert!(!manager.delete(None).await.unwrap());
        assert!(!manager.delete(Some("")).await.unwrap());
        assert!(manager.delete(Some(agent.id())).await.unwrap());
        assert!(!manager.delete(Some(agent.id())).await.unwrap());
    }
}
