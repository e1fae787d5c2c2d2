//! Advisor configuration
//!
//! Loaded from `~/.advisor/config.toml` (or an explicit path). Every field has
//! a default reproducing the stock deployment: an orchestrator routing to a
//! scenario agent and a joke agent, all on `gpt-4o`. Secrets may come from
//! the environment instead of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::McpSettings;
use crate::constants::{agents, conversation, engine};
use crate::engine::{AuthScheme, EngineSettings};
use crate::error::AdvisorError;
use crate::orchestrator::EndTokenMatch;
use crate::paths;

pub const ENV_ENGINE_API_KEY: &str = "ADVISOR_ENGINE_API_KEY";
pub const ENV_CATALOG_API_KEY: &str = "ADVISOR_CATALOG_API_KEY";
pub const ENV_CATALOG_BEARER_TOKEN: &str = "ADVISOR_CATALOG_BEARER_TOKEN";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub engine: EngineConfig,
    pub catalog: Option<CatalogConfig>,
    pub orchestrator: OrchestratorConfig,
    pub agents: Vec<AgentConfig>,
    pub history: HistoryConfig,
    pub conversation: ConversationConfig,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            catalog: None,
            orchestrator: OrchestratorConfig::default(),
            agents: default_agents(),
            history: HistoryConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

/// Inference engine connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub endpoint: String,
    pub api_version: Option<String>,
    pub auth: AuthScheme,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: None,
            auth: AuthScheme::default(),
            api_key: None,
            poll_interval_ms: engine::POLL_INTERVAL.as_millis() as u64,
            run_timeout_secs: engine::RUN_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            endpoint: self.endpoint.clone(),
            api_version: self.api_version.clone(),
            auth: self.auth,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            run_timeout: Duration::from_secs(self.run_timeout_secs),
        }
    }
}

/// External tool catalog connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl CatalogConfig {
    pub fn settings(&self) -> McpSettings {
        McpSettings {
            endpoint: self.endpoint.clone(),
            subscription_key: self.subscription_key.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

/// The top-level agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Bind to this existing definition instead of creating one
    pub id: Option<String>,
    pub name: String,
    pub instructions: String,
    pub model: String,
    /// Also give the orchestrator the external tools, not only the sub-agents
    pub direct_tools: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: agents::ORCHESTRATOR_NAME.to_string(),
            instructions: agents::ORCHESTRATOR_INSTRUCTIONS.to_string(),
            model: engine::DEFAULT_MODEL.to_string(),
            direct_tools: false,
        }
    }
}

/// One sub-agent: an existing `id` to fetch, or a definition to create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl AgentConfig {
    pub fn new(name: &str, instructions: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            instructions: instructions.to_string(),
            model: default_model(),
        }
    }

    pub fn existing(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: String::new(),
            instructions: String::new(),
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    engine::DEFAULT_MODEL.to_string()
}

fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new(agents::SCENARIO_NAME, agents::SCENARIO_INSTRUCTIONS),
        AgentConfig::new(agents::JOKE_NAME, agents::JOKE_INSTRUCTIONS),
    ]
}

/// Display history persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Defaults to `~/.advisor/history.db`
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::history_db)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub end_token: String,
    /// `substring` (default) or `whole_word`
    pub end_token_match: EndTokenMatch,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            end_token: conversation::END_TOKEN.to_string(),
            end_token_match: EndTokenMatch::default(),
        }
    }
}

impl AdvisorConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, AdvisorError> {
        toml::from_str(content).map_err(|e| AdvisorError::Config(format!("invalid config: {}", e)))
    }

    /// Load configuration from `path`, or the default location
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error. Environment overrides are applied; call `validate` before
    /// connecting to anything.
    pub fn load(path: Option<&Path>) -> Result<Self, AdvisorError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let default_path = paths::config_file();
                if default_path.exists() {
                    Self::read(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, AdvisorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AdvisorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded config");
        Self::from_toml(&content)
    }

    /// Fill secrets from the environment; set values win over the file
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(key) = lookup(ENV_ENGINE_API_KEY) {
            self.engine.api_key = Some(key);
        }
        if let Some(catalog) = self.catalog.as_mut() {
            if let Some(key) = lookup(ENV_CATALOG_API_KEY) {
                catalog.subscription_key = Some(key);
            }
            if let Some(token) = lookup(ENV_CATALOG_BEARER_TOKEN) {
                catalog.bearer_token = Some(token);
            }
        }
    }

    /// Reject configurations the service cannot start with
    pub fn validate(&self) -> Result<(), AdvisorError> {
        let invalid = |msg: String| Err(AdvisorError::Config(msg));

        if self.engine.endpoint.trim().is_empty() {
            return invalid("engine.endpoint is required".into());
        }
        if self.engine.poll_interval_ms == 0 {
            return invalid("engine.poll_interval_ms must be positive".into());
        }
        if let Some(catalog) = &self.catalog {
            if catalog.endpoint.trim().is_empty() {
                return invalid("catalog.endpoint is required when [catalog] is present".into());
            }
        }
        if self.orchestrator.id.is_none() && self.orchestrator.name.trim().is_empty() {
            return invalid("orchestrator.name is required unless orchestrator.id is set".into());
        }
        for (index, agent) in self.agents.iter().enumerate() {
            if agent.id.is_none() && agent.name.trim().is_empty() {
                return invalid(format!("agents[{}] needs an id or a name", index));
            }
        }
        let token = &self.conversation.end_token;
        if token.trim().is_empty() {
            return invalid("conversation.end_token must not be empty".into());
        }
        if self.conversation.end_token_match == EndTokenMatch::WholeWord
            && !token.chars().all(char::is_alphanumeric)
        {
            return invalid(
                "conversation.end_token must be a single word for whole_word matching".into(),
            );
        }
        Ok(())
    }

    /// Engine credential, required to talk to the engine
    pub fn engine_credential(&self) -> Result<&str, AdvisorError> {
        self.engine.api_key.as_deref().ok_or_else(|| {
            AdvisorError::Config(format!(
                "no engine credential: set engine.api_key or {}",
                ENV_ENGINE_API_KEY
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reproduce_stock_agents() {
        let config = AdvisorConfig::from_toml("").unwrap();

        assert_eq!(config.orchestrator.name, "orchestrator-agent");
        let names: Vec<&str> = config.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["scenario-agent", "joke-agent"]);
        assert!(config.agents.iter().all(|a| a.model == "gpt-4o"));
        assert_eq!(config.conversation.end_token, "end");
        assert!(config.catalog.is_none());
        assert!(config.history.enabled);
    }

    #[test]
    fn test_parse_full_config() {
        let config = AdvisorConfig::from_toml(
            r#"
            [engine]
            endpoint = "https://example.test/api/projects/advisor"
            api_version = "2025-05-01"
            auth = "api_key"
            poll_interval_ms = 250

            [catalog]
            endpoint = "https://tools.example.test/mcp"
            subscription_key = "sub"

            [orchestrator]
            id = "asst_orchestrator"
            direct_tools = true

            [[agents]]
            id = "asst_scenario"

            [[agents]]
            name = "tariff-agent"
            instructions = "Explain tariffs."
            model = "gpt-4o-mini"

            [history]
            path = "/tmp/advisor-history.db"

            [conversation]
            end_token = "bye"
            end_token_match = "whole_word"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.auth, AuthScheme::ApiKey);
        let settings = config.engine.settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.api_version.as_deref(), Some("2025-05-01"));
        assert_eq!(config.agents[0], AgentConfig::existing("asst_scenario"));
        assert_eq!(config.agents[1].model, "gpt-4o-mini");
        assert!(config.orchestrator.direct_tools);
        assert_eq!(
            config.history.resolved_path(),
            PathBuf::from("/tmp/advisor-history.db")
        );
        assert_eq!(config.conversation.end_token, "bye");
        assert_eq!(config.conversation.end_token_match, EndTokenMatch::WholeWord);
        config.validate().unwrap();
    }

    #[test]
    fn test_explicit_empty_agent_list_is_kept() {
        let config = AdvisorConfig::from_toml("agents = []").unwrap();
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_env_overrides_secrets() {
        let mut config = AdvisorConfig::from_toml(
            r#"
            [engine]
            endpoint = "https://example.test"
            api_key = "from-file"

            [catalog]
            endpoint = "https://tools.example.test/mcp"
            "#,
        )
        .unwrap();

        config.apply_env_overrides(|key| match key {
            ENV_ENGINE_API_KEY => Some("from-env".to_string()),
            ENV_CATALOG_BEARER_TOKEN => Some("token".to_string()),
            ENV_CATALOG_API_KEY => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.engine_credential().unwrap(), "from-env");
        let catalog = config.catalog.unwrap();
        assert_eq!(catalog.bearer_token.as_deref(), Some("token"));
        assert_eq!(catalog.subscription_key, None);
    }

    #[test]
    fn test_validation_errors() {
        let missing_endpoint = AdvisorConfig::from_toml("").unwrap();
        assert!(matches!(
            missing_endpoint.validate(),
            Err(AdvisorError::Config(ref m)) if m.contains("engine.endpoint")
        ));

        let mut config = AdvisorConfig::from_toml("[engine]\nendpoint = \"http://x\"").unwrap();
        config.validate().unwrap();
        assert!(config.engine_credential().is_err());

        config.agents.push(AgentConfig::new("", ""));
        assert!(config.validate().is_err());
        config.agents.pop();

        config.conversation.end_token = "good bye".into();
        config.validate().unwrap();
        config.conversation.end_token_match = EndTokenMatch::WholeWord;
        assert!(config.validate().is_err());
        config.conversation.end_token = " ".into();
        config.conversation.end_token_match = EndTokenMatch::Substring;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            AdvisorConfig::from_toml("[engine\nendpoint"),
            Err(AdvisorError::Config(_))
        ));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nendpoint = \"http://localhost:8080\"\n").unwrap();

        let config = AdvisorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.engine.endpoint, "http://localhost:8080");

        let missing = temp_dir.path().join("missing.toml");
        assert!(AdvisorConfig::load(Some(&missing)).is_err());
    }
}
