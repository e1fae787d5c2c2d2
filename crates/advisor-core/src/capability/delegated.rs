//! Sub-agents exposed as capabilities
//!
//! Invoking a delegated agent runs a full nested turn on a fresh thread with
//! its own call log. The nested records stay with the nested turn; the parent
//! only sees the sub-agent's final message.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    Arguments, Capability, CapabilityOutput, ChatMessage, ParameterKind, ParameterSpec,
    Provenance,
};
use crate::error::AdvisorError;
use crate::interceptor::{CallInterceptor, CallLog};
use crate::lifecycle::AgentHandle;
use crate::orchestrator::{run_agent_loop, LoopOutcome};
use crate::thread::ThreadManager;

/// Capability backed by a sub-agent
pub struct DelegatedAgentCapability {
    agent: AgentHandle,
    description: String,
    parameters: Vec<ParameterSpec>,
}

impl DelegatedAgentCapability {
    pub fn new(agent: AgentHandle) -> Self {
        let description = match agent.definition().instructions.trim() {
            "" => format!("Delegate the request to the {} agent.", agent.name()),
            instructions => instructions.to_string(),
        };
        Self {
            agent,
            description,
            parameters: vec![
                ParameterSpec::required(
                    "query",
                    ParameterKind::String,
                    "The request to hand to the agent",
                ),
                ParameterSpec::optional(
                    "instructions",
                    ParameterKind::String,
                    "Additional instructions for this request",
                ),
            ],
        }
    }

    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }
}

/// Turn the selected arguments into the sub-agent's user text
///
/// `query` is used as-is; any other arguments are rendered as `key: value`
/// lines. `instructions` is appended.
fn render_prompt(arguments: &Arguments) -> String {
    let text = |value: &Value| match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let mut prompt = match arguments.get("query") {
        Some(query) => text(query),
        None => arguments
            .iter()
            .filter(|(key, _)| key.as_str() != "instructions")
            .map(|(key, value)| format!("{}: {}", key, text(value)))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    if let Some(extra) = arguments.get("instructions").map(text) {
        if !extra.is_empty() {
            prompt.push_str("\n\nAdditional instructions: ");
            prompt.push_str(&extra);
        }
    }
    prompt
}

#[async_trait]
impl Capability for DelegatedAgentCapability {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn provenance(&self) -> Provenance {
        Provenance::DelegatedAgent
    }

    async fn invoke(
        &self,
        arguments: &Arguments,
        cancel: &CancellationToken,
    ) -> Result<CapabilityOutput, AdvisorError> {
        let threads = ThreadManager::new(self.agent.engine().clone());
        let thread = threads.resolve(None).await?;
        let interceptor = CallInterceptor::new(CallLog::new());
        let prompt = render_prompt(arguments);

        debug!(agent = self.agent.name(), thread = thread.id(), "Running delegated turn");
        let outcome = run_agent_loop(&self.agent, &thread, &prompt, &interceptor, cancel).await;

        if let Err(e) = threads.release(thread.id()).await {
            warn!(agent = self.agent.name(), thread = thread.id(), error = %e, "Failed to release delegated thread");
        }

        debug!(
            agent = self.agent.name(),
            nested_calls = interceptor.log().len(),
            "Delegated turn finished"
        );
        Ok(match outcome? {
            LoopOutcome::Reply(text) => CapabilityOutput::Messages(vec![ChatMessage {
                author: Some(self.agent.name().to_string()),
                content: text,
            }]),
            LoopOutcome::NoReply => CapabilityOutput::Empty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::StaticCapability;
    use crate::capability::CapabilityRegistry;
    use crate::constants::groups;
    use crate::engine::scripted::{reply, select, ScriptedEngine};
    use crate::lifecycle::LifecycleManager;
    use serde_json::json;
    use std::sync::Arc;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_render_prompt_prefers_query() {
        assert_eq!(
            render_prompt(&args(json!({"query": "tell me a joke"}))),
            "tell me a joke"
        );
        assert_eq!(
            render_prompt(&args(json!({"usage": "300kWh", "months": 12}))),
            "usage: 300kWh\nmonths: 12"
        );
        assert_eq!(
            render_prompt(&args(json!({"query": "q", "instructions": "be brief"}))),
            "q\n\nAdditional instructions: be brief"
        );
    }

    #[tokio::test]
    async fn test_invoke_runs_nested_turn_with_own_tools() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.script(
            "installment for 300kWh",
            vec![select("get_tariff", json!({"plan": "green"})), reply("42 EUR")],
        );
        let mut tools = CapabilityRegistry::new();
        tools.register(
            groups::EXTERNAL_TOOLS,
            vec![Arc::new(StaticCapability::new("get_tariff", "0.14 EUR/kWh"))],
        );
        let agent = LifecycleManager::new(engine.clone())
            .create("scenario-agent", "Scenarios", "gpt-4o", Some(tools))
            .await
            .unwrap();
        let capability = DelegatedAgentCapability::new(agent);

        let output = capability
            .invoke(
                &args(json!({"query": "installment for 300kWh"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.response_text().as_deref(), Some("42 EUR"));
        assert_eq!(capability.name(), "scenario-agent");
        assert_eq!(capability.description(), "Scenarios");
        assert_eq!(capability.provenance(), Provenance::DelegatedAgent);
        assert_eq!(engine.deleted_threads().len(), 1);
        assert_eq!(engine.live_threads(), 0);
    }

    #[tokio::test]
    async fn test_invoke_without_reply_is_empty() {
        let engine = Arc::new(ScriptedEngine::new());
        let agent = LifecycleManager::new(engine.clone())
            .create("joke-agent", "", "gpt-4o", None)
            .await
            .unwrap();
        let capability = DelegatedAgentCapability::new(agent);

        let output = capability
            .invoke(&args(json!({"query": "silence"})), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output, CapabilityOutput::Empty);
        assert!(capability.description().contains("joke-agent"));
    }

    #[tokio::test]
    async fn test_nested_failure_still_releases_thread() {
        let engine = Arc::new(ScriptedEngine::new());
        engine.fail_on("boom");
        let agent = LifecycleManager::new(engine.clone())
            .create("scenario-agent", "x", "gpt-4o", None)
            .await
            .unwrap();

        let err = DelegatedAgentCapability::new(agent)
            .invoke(&args(json!({"query": "boom"})), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AdvisorError::EngineUnavailable(_)));
        assert_eq!(engine.live_threads(), 0);
    }
}
