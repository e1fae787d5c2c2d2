//! Inference engine interface
//!
//! The engine owns agent definitions and threads and, given a thread plus the
//! latest input, decides the next step: call a capability, answer, or stop.
//! `HttpEngine` talks to an assistants-style REST service; tests use a
//! scripted in-memory engine.

pub mod http;
#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{Arguments, CapabilityDescriptor};
use crate::error::AdvisorError;

pub use http::{AuthScheme, EngineSettings, HttpEngine};

/// An agent definition stored on the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub model: String,
}

/// A capability call selected by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityCall {
    /// Engine-side id used to correlate the output
    pub call_id: String,
    pub name: String,
    pub arguments: Arguments,
}

/// What the engine wants to happen next
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    CapabilitySelection(CapabilityCall),
    FinalReply(String),
    /// The run finished without any reply content
    EndOfStream,
}

/// Input for one engine step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// The user's turn text
    User(String),
    /// Output of the capability selected in the previous step
    CapabilityOutput {
        call_id: String,
        output: String,
        is_error: bool,
    },
}

/// Trait for the inference engine backing every agent
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Create an agent definition. Not idempotent.
    async fn create_definition(
        &self,
        model: &str,
        name: &str,
        instructions: &str,
        tools: &[CapabilityDescriptor],
    ) -> Result<AgentDefinition, AdvisorError>;

    /// Fetch a definition, `NotFound` if absent
    async fn get_definition(&self, id: &str) -> Result<AgentDefinition, AdvisorError>;

    /// Delete a definition, returning the engine's deletion outcome
    async fn delete_definition(&self, id: &str) -> Result<bool, AdvisorError>;

    /// Create a new empty thread and return its id
    async fn create_thread(&self) -> Result<String, AdvisorError>;

    /// Delete a thread and everything attached to it
    async fn delete_thread(&self, thread_id: &str) -> Result<bool, AdvisorError>;

    /// Advance the thread by one step
    async fn run_turn(
        &self,
        thread_id: &str,
        agent: &AgentDefinition,
        input: TurnInput,
        capabilities: &[CapabilityDescriptor],
    ) -> Result<NextStep, AdvisorError>;
}
