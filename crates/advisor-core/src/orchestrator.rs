//! Orchestrator and agent loop
//!
//! `run_agent_loop` drives one turn of any agent: ask the engine for the next
//! step, invoke the selected capability through the interceptor, feed the
//! output back, repeat until a reply or the end of the stream. Delegated
//! sub-agents run the same loop on their own thread with their own call log.
//!
//! The `Orchestrator` is the top-level agent: its capabilities are the
//! sub-agents plus any external tools, and `converse` is its entry point.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{Capability, CapabilityRegistry, DelegatedAgentCapability, Provenance};
use crate::constants::{conversation, groups};
use crate::engine::{InferenceEngine, NextStep, TurnInput};
use crate::error::AdvisorError;
use crate::interceptor::{CallInterceptor, CallLog, InvocationContext, ToolCallRecord};
use crate::lifecycle::{AgentHandle, LifecycleManager};
use crate::storage::{HistoryMessage, HistoryRole, HistoryStore};
use crate::thread::{ConversationThread, ThreadManager};

/// How one agent turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopOutcome {
    Reply(String),
    /// The engine finished without reply content
    NoReply,
}

/// Drive one turn of `agent` on `thread` until it replies or stops
pub(crate) async fn run_agent_loop(
    agent: &AgentHandle,
    thread: &ConversationThread,
    text: &str,
    interceptor: &CallInterceptor,
    cancel: &CancellationToken,
) -> Result<LoopOutcome, AdvisorError> {
    let engine = agent.engine();
    let registry = agent.capabilities();
    let visible = registry.descriptors();
    let mut input = TurnInput::User(text.to_string());
    let mut steps = 0usize;

    loop {
        steps += 1;
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdvisorError::Cancelled),
            step = engine.run_turn(thread.id(), agent.definition(), input, &visible) => step?,
        };

        let call = match step {
            NextStep::FinalReply(reply) if !reply.trim().is_empty() => {
                debug!(agent = agent.name(), steps, "Agent replied");
                return Ok(LoopOutcome::Reply(reply));
            }
            NextStep::FinalReply(_) | NextStep::EndOfStream => {
                debug!(agent = agent.name(), steps, "Agent produced no reply");
                return Ok(LoopOutcome::NoReply);
            }
            NextStep::CapabilitySelection(call) => call,
        };

        input = match registry.lookup(&call.name) {
            Some(resolved) => {
                info!(
                    agent = agent.name(),
                    capability = %call.name,
                    group = resolved.group,
                    "Invoking capability"
                );
                let ctx = InvocationContext {
                    function_name: &call.name,
                    group_name: resolved.group,
                    arguments: &call.arguments,
                };
                let invocation =
                    interceptor.wrap(ctx, resolved.capability.invoke(&call.arguments, cancel));
                let output = match resolved.capability.provenance() {
                    // Nested turns watch `cancel` themselves and release their thread on the way out
                    Provenance::DelegatedAgent => invocation.await?,
                    Provenance::ExternalTool => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AdvisorError::Cancelled),
                        output = invocation => output?,
                    },
                };
                TurnInput::CapabilityOutput {
                    call_id: call.call_id,
                    output: output.to_engine_text(),
                    is_error: false,
                }
            }
            None => {
                warn!(agent = agent.name(), capability = %call.name, "Engine selected unknown capability");
                TurnInput::CapabilityOutput {
                    call_id: call.call_id,
                    output: format!("Unknown function: {}", call.name),
                    is_error: true,
                }
            }
        };
    }
}

/// How the end-of-conversation token is matched against turn text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndTokenMatch {
    /// Literal, case-sensitive substring
    #[default]
    Substring,
    /// Whole word, ignoring ASCII case
    WholeWord,
}

impl EndTokenMatch {
    fn matches(self, text: &str, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match self {
            EndTokenMatch::Substring => text.contains(token),
            EndTokenMatch::WholeWord => text
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word.eq_ignore_ascii_case(token)),
        }
    }
}

/// Everything needed to create an orchestrator
pub struct OrchestratorOptions {
    pub name: String,
    pub instructions: String,
    pub model: String,
    /// Exposed as delegated-agent capabilities
    pub sub_agents: Vec<AgentHandle>,
    /// Exposed as-is, typically external tools
    pub tools: Vec<Arc<dyn Capability>>,
    pub end_token: String,
    pub end_token_match: EndTokenMatch,
}

impl OrchestratorOptions {
    pub fn new(name: &str, instructions: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: instructions.to_string(),
            model: model.to_string(),
            sub_agents: Vec::new(),
            tools: Vec::new(),
            end_token: conversation::END_TOKEN.to_string(),
            end_token_match: EndTokenMatch::default(),
        }
    }

    pub fn with_sub_agents(mut self, sub_agents: Vec<AgentHandle>) -> Self {
        self.sub_agents = sub_agents;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Capability>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_end_token(mut self, token: &str) -> Self {
        self.end_token = token.to_string();
        self
    }

    pub fn with_end_token_match(mut self, mode: EndTokenMatch) -> Self {
        self.end_token_match = mode;
        self
    }

    fn registry(&self) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            groups::AGENTS,
            self.sub_agents
                .iter()
                .map(|agent| Arc::new(DelegatedAgentCapability::new(agent.clone())) as Arc<dyn Capability>)
                .collect(),
        );
        registry.register(groups::EXTERNAL_TOOLS, self.tools.clone());
        registry
    }
}

/// Reply to a normal turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub thread_id: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// `false` when `text` is the fallback reply
    pub answered: bool,
}

/// Result of `Orchestrator::converse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConverseOutcome {
    Reply(TurnReply),
    /// The user ended the conversation; the thread, if known, was released
    EndOfConversation { thread_id: Option<String> },
}

/// Top-level agent dispatching turns to sub-agents and tools
pub struct Orchestrator {
    agent: AgentHandle,
    threads: ThreadManager,
    lifecycle: LifecycleManager,
    end_token: String,
    end_token_match: EndTokenMatch,
    history: Option<Arc<dyn HistoryStore>>,
}

impl Orchestrator {
    /// Create a new orchestrator definition on the engine
    pub async fn create(
        engine: Arc<dyn InferenceEngine>,
        options: OrchestratorOptions,
    ) -> Result<Self, AdvisorError> {
        let lifecycle = LifecycleManager::new(engine.clone());
        let registry = options.registry();
        let agent = lifecycle
            .create(&options.name, &options.instructions, &options.model, Some(registry))
            .await?;
        Ok(Self::from_parts(agent, engine, lifecycle, &options))
    }

    /// Bind to an existing orchestrator definition
    pub async fn get(
        engine: Arc<dyn InferenceEngine>,
        agent_id: &str,
        options: OrchestratorOptions,
    ) -> Result<Self, AdvisorError> {
        let lifecycle = LifecycleManager::new(engine.clone());
        let agent = lifecycle.get(agent_id, Some(options.registry())).await?;
        Ok(Self::from_parts(agent, engine, lifecycle, &options))
    }

    fn from_parts(
        agent: AgentHandle,
        engine: Arc<dyn InferenceEngine>,
        lifecycle: LifecycleManager,
        options: &OrchestratorOptions,
    ) -> Self {
        info!(
            id = agent.id(),
            capabilities = ?agent.capabilities().names(),
            "Orchestrator ready"
        );
        Self {
            agent,
            threads: ThreadManager::new(engine),
            lifecycle,
            end_token: options.end_token.clone(),
            end_token_match: options.end_token_match,
            history: None,
        }
    }

    /// Persist display history for every answered turn
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn agent(&self) -> &AgentHandle {
        &self.agent
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn history(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history.as_ref()
    }

    /// Whether `text` asks to end the conversation
    pub fn is_end_of_conversation(&self, text: &str) -> bool {
        self.end_token_match.matches(text, &self.end_token)
    }

    /// Handle one user turn
    ///
    /// Every call gets its own call log, so concurrent conversations never
    /// share records.
    pub async fn converse(
        &self,
        text: &str,
        thread_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ConverseOutcome, AdvisorError> {
        if self.is_end_of_conversation(text) {
            return Ok(self.end_conversation(thread_id).await);
        }

        let thread = self.threads.resolve(thread_id).await?;
        let log = CallLog::new();
        let interceptor = CallInterceptor::new(log.clone());

        let outcome = run_agent_loop(&self.agent, &thread, text, &interceptor, cancel).await?;
        let (reply, answered) = match outcome {
            LoopOutcome::Reply(reply) => (reply, true),
            LoopOutcome::NoReply => (conversation::FALLBACK_REPLY.to_string(), false),
        };
        let tool_calls = log.take();

        info!(
            thread = thread.id(),
            tool_calls = tool_calls.len(),
            answered,
            "Turn complete"
        );
        self.record_history(thread.id(), text, &reply, &tool_calls).await;

        Ok(ConverseOutcome::Reply(TurnReply {
            text: reply,
            thread_id: thread.id().to_string(),
            tool_calls,
            answered,
        }))
    }

    /// End a conversation, releasing its engine thread when known
    pub async fn end_conversation(&self, thread_id: Option<&str>) -> ConverseOutcome {
        let thread_id = thread_id.filter(|id| !id.is_empty()).map(str::to_string);
        info!(thread = ?thread_id, "Ending conversation");
        if let Some(id) = &thread_id {
            if let Err(e) = self.threads.release(id).await {
                warn!(thread = %id, error = %e, "Failed to release thread");
            }
        }
        ConverseOutcome::EndOfConversation { thread_id }
    }

    /// Delete an agent definition on the orchestrator's engine
    pub async fn delete(&self, agent_id: Option<&str>) -> Result<bool, AdvisorError> {
        self.lifecycle.delete(agent_id).await
    }

    async fn record_history(
        &self,
        thread_id: &str,
        text: &str,
        reply: &str,
        tool_calls: &[ToolCallRecord],
    ) {
        let Some(history) = &self.history else {
            return;
        };
        let now = Utc::now();
        let messages = [
            HistoryMessage {
                role: HistoryRole::User,
                content: text.to_string(),
                tool_calls: Vec::new(),
                created_at: now,
            },
            HistoryMessage {
                role: HistoryRole::Assistant,
                content: reply.to_string(),
                tool_calls: tool_calls.to_vec(),
                created_at: now,
            },
        ];
        for message in &messages {
            if let Err(e) = history.append(thread_id, message).await {
                warn!(thread = thread_id, error = %e, "Failed to persist history");
                return;
            }
        }
    }
}
