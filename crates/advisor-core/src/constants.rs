//! Application constants and configuration defaults
//!
//! Centralized location for magic strings and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Per-request timeout. Runs are polled, so no single request is long-lived.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// User agent sent to the engine and the tool catalog
    pub const USER_AGENT: &str = "InstallmentAdvisor/0.1";
}

/// Inference engine defaults
pub mod engine {
    use super::*;

    /// Default model for every agent definition
    pub const DEFAULT_MODEL: &str = "gpt-4o";

    /// Delay between run status polls
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Upper bound on how long a single run may stay queued or in progress
    pub const RUN_TIMEOUT: Duration = Duration::from_secs(300);
}

/// Conversation behaviour
pub mod conversation {
    /// Reply returned when the engine finishes a turn without producing text
    pub const FALLBACK_REPLY: &str = "I didn't understand that. Please try again.";

    /// Reply sent right before an end-of-conversation signal
    pub const ENDING_REPLY: &str = "Ending conversation...";

    /// Token that ends a conversation when it appears in a user turn
    pub const END_TOKEN: &str = "end";
}

/// Capability group names
pub mod groups {
    /// Group holding sub-agents exposed as functions
    pub const AGENTS: &str = "AgentsPlugin";

    /// Group holding tools discovered from the external catalog
    pub const EXTERNAL_TOOLS: &str = "MCP";
}

/// Built-in agent definitions used when the configuration names none
pub mod agents {
    pub const ORCHESTRATOR_NAME: &str = "orchestrator-agent";
    pub const ORCHESTRATOR_INSTRUCTIONS: &str = r#"You are an orchestrator agent that manages the conversation flow between different agents.
You will delegate tasks to other agents based on the user's input, consulting multiple agents if necessary.
If the user asks questions about energy usage, installment amounts etc., use the scenario agent to provide detailed information about energy consumption scenarios.
If the user asks for a joke, use the joke agent to provide a humorous energy-related joke."#;

    pub const SCENARIO_NAME: &str = "scenario-agent";
    pub const SCENARIO_INSTRUCTIONS: &str = r#"You are a specialized agent that provides information about energy consumption scenarios.
When asked about energy consumption, usage or installment amounts, respond with relevant information about the specific scenario.
For example, if asked about installment amounts, provide the calculated installment amount based on the given parameters."#;

    pub const JOKE_NAME: &str = "joke-agent";
    pub const JOKE_INSTRUCTIONS: &str = r#"You are an agent that provides energy jokes to the user.
When the user asks for a joke, respond with a humorous energy-related joke."#;
}

/// Storage configuration
pub mod storage {
    /// Config directory name
    pub const CONFIG_DIR_NAME: &str = ".advisor";

    /// Config file name inside the config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// History database file name
    pub const HISTORY_DB_NAME: &str = "history.db";
}

/// MCP client identity
pub mod mcp {
    /// Protocol revision announced during initialize
    pub const PROTOCOL_VERSION: &str = "2024-11-05";

    pub const CLIENT_NAME: &str = "installment-advisor";

    /// Upper bound on `tools/list` pages fetched during discovery
    pub const MAX_LIST_PAGES: usize = 50;
}
