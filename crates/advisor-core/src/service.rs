//! Startup wiring
//!
//! `AgentService` discovers the external tools, fetches or creates the
//! sub-agents with those tools attached, and binds the orchestrator over the
//! sub-agents. Everything it builds is shared read-only afterwards.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{info, warn};

use crate::capability::{Capability, CapabilityRegistry};
use crate::catalog::{discover_capabilities, McpCatalog, ToolCatalog};
use crate::config::{AdvisorConfig, AgentConfig};
use crate::constants::groups;
use crate::engine::{HttpEngine, InferenceEngine};
use crate::error::AdvisorError;
use crate::lifecycle::{AgentHandle, LifecycleManager};
use crate::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::storage::{HistoryStore, SqliteHistoryStore};

/// The running set of agents
pub struct AgentService {
    orchestrator: Arc<Orchestrator>,
    sub_agents: Vec<AgentHandle>,
    tools: Vec<Arc<dyn Capability>>,
}

impl AgentService {
    /// Bring up agents against the given engine, catalog and history store
    ///
    /// A catalog that cannot list its tools leaves every agent without
    /// external tools; any engine failure aborts startup.
    pub async fn start(
        config: &AdvisorConfig,
        engine: Arc<dyn InferenceEngine>,
        catalog: Option<Arc<dyn ToolCatalog>>,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Result<Self, AdvisorError> {
        let tools = match catalog {
            Some(catalog) => discover_capabilities(catalog).await,
            None => Vec::new(),
        };

        let lifecycle = LifecycleManager::new(engine.clone());
        let sub_agents = try_join_all(
            config
                .agents
                .iter()
                .map(|agent| bind_sub_agent(&lifecycle, agent, &tools)),
        )
        .await?;

        let settings = &config.orchestrator;
        let mut options =
            OrchestratorOptions::new(&settings.name, &settings.instructions, &settings.model)
                .with_sub_agents(sub_agents.clone())
                .with_end_token(&config.conversation.end_token)
                .with_end_token_match(config.conversation.end_token_match);
        if settings.direct_tools {
            options = options.with_tools(tools.clone());
        }

        let orchestrator = match settings.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => Orchestrator::get(engine, id, options).await?,
            None => Orchestrator::create(engine, options).await?,
        };
        let orchestrator = match history {
            Some(history) => orchestrator.with_history(history),
            None => orchestrator,
        };

        info!(
            orchestrator = orchestrator.agent().id(),
            sub_agents = sub_agents.len(),
            tools = tools.len(),
            "Agent service started"
        );
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            sub_agents,
            tools,
        })
    }

    /// Build the engine, catalog and history store from configuration, then start
    pub async fn from_config(config: &AdvisorConfig) -> Result<Self, AdvisorError> {
        config.validate()?;
        let engine: Arc<dyn InferenceEngine> = Arc::new(HttpEngine::new(
            config.engine.settings(),
            config.engine_credential()?.to_string(),
        ));

        let catalog: Option<Arc<dyn ToolCatalog>> = match &config.catalog {
            Some(catalog) => match McpCatalog::connect(catalog.settings()).await {
                Ok(client) => Some(Arc::new(client) as Arc<dyn ToolCatalog>),
                Err(e) => {
                    warn!(error = %e, "Failed to connect to tool catalog");
                    None
                }
            },
            None => None,
        };

        let history: Option<Arc<dyn HistoryStore>> = if config.history.enabled {
            let path = config.history.resolved_path();
            match SqliteHistoryStore::open(&path) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn HistoryStore>),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "History disabled");
                    None
                }
            }
        } else {
            None
        };

        Self::start(config, engine, catalog, history).await
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn sub_agents(&self) -> &[AgentHandle] {
        &self.sub_agents
    }

    /// External tools discovered at startup
    pub fn tools(&self) -> &[Arc<dyn Capability>] {
        &self.tools
    }
}

fn tool_registry(tools: &[Arc<dyn Capability>]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(groups::EXTERNAL_TOOLS, tools.to_vec());
    registry
}

async fn bind_sub_agent(
    lifecycle: &LifecycleManager,
    agent: &AgentConfig,
    tools: &[Arc<dyn Capability>],
) -> Result<AgentHandle, AdvisorError> {
    let registry = Some(tool_registry(tools));
    match agent.id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => lifecycle.get(id, registry).await,
        None => {
            lifecycle
                .create(&agent.name, &agent.instructions, &agent.model, registry)
                .await
        }
    }
}
