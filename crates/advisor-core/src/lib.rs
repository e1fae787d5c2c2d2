//! Advisor Core - Multi-agent orchestration for the installment advisor
//!
//! This crate provides the core functionality for the `advisor` CLI:
//! - Capabilities (sub-agents and external tools) behind one trait
//! - Per-turn call interception and audit records
//! - Engine threads and agent definition lifecycle
//! - The orchestrator loop and conversation service
//! - MCP tool catalog and HTTP inference engine clients
//! - SQLite conversation history

pub mod capability;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod orchestrator;
pub mod paths;
pub mod service;
pub mod storage;
pub mod thread;

// Re-exports for convenience
pub use capability::{Capability, CapabilityOutput, CapabilityRegistry};
pub use config::AdvisorConfig;
pub use conversation::{ConversationService, InboundTurn, OutboundActivity};
pub use engine::{HttpEngine, InferenceEngine};
pub use error::{AdvisorError, EndOfConversationCode};
pub use interceptor::{CallInterceptor, CallLog, ToolCallRecord};
pub use orchestrator::{
    ConverseOutcome, EndTokenMatch, Orchestrator, OrchestratorOptions, TurnReply,
};
pub use service::AgentService;
pub use storage::{HistoryStore, SqliteHistoryStore};
pub use thread::{ConversationThread, ThreadManager};
