//! Scripted in-memory engine for tests
//!
//! A script is keyed by the user text that starts a turn. Each user turn
//! loads the script's steps onto the thread; every later capability output
//! pops the next step. An exhausted script ends with `EndOfStream`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{AgentDefinition, CapabilityCall, InferenceEngine, NextStep, TurnInput};
use crate::capability::CapabilityDescriptor;
use crate::error::AdvisorError;

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    scripts: Mutex<HashMap<String, Vec<NextStep>>>,
    failures: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, VecDeque<NextStep>>>,
    threads: Mutex<HashSet<String>>,
    definitions: Mutex<HashMap<String, AgentDefinition>>,
    inputs: Mutex<Vec<(String, TurnInput)>>,
    deleted_threads: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps to play when a turn starts with `text`
    pub fn script(&self, text: &str, steps: Vec<NextStep>) {
        self.scripts.lock().insert(text.to_string(), steps);
    }

    /// Make turns starting with `text` fail as if the engine were down
    pub fn fail_on(&self, text: &str) {
        self.failures.lock().insert(text.to_string());
    }

    /// All inputs received, in order, with their thread id
    pub fn inputs(&self) -> Vec<(String, TurnInput)> {
        self.inputs.lock().clone()
    }

    pub fn user_turns(&self) -> Vec<String> {
        self.inputs
            .lock()
            .iter()
            .filter_map(|(_, input)| match input {
                TurnInput::User(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_threads(&self) -> Vec<String> {
        self.deleted_threads.lock().clone()
    }

    pub fn live_threads(&self) -> usize {
        self.threads.lock().len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Shorthand for a capability selection step
pub(crate) fn select(name: &str, arguments: Value) -> NextStep {
    NextStep::CapabilitySelection(CapabilityCall {
        call_id: format!("call_{}", name),
        name: name.to_string(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    })
}

pub(crate) fn reply(text: &str) -> NextStep {
    NextStep::FinalReply(text.to_string())
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn create_definition(
        &self,
        model: &str,
        name: &str,
        instructions: &str,
        _tools: &[CapabilityDescriptor],
    ) -> Result<AgentDefinition, AdvisorError> {
        let definition = AgentDefinition {
            id: self.next_id("asst"),
            name: name.to_string(),
            instructions: instructions.to_string(),
            model: model.to_string(),
        };
        self.definitions
            .lock()
            .insert(definition.id.clone(), definition.clone());
        Ok(definition)
    }

    async fn get_definition(&self, id: &str) -> Result<AgentDefinition, AdvisorError> {
        self.definitions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AdvisorError::NotFound(format!("agent {}", id)))
    }

    async fn delete_definition(&self, id: &str) -> Result<bool, AdvisorError> {
        match self.definitions.lock().remove(id) {
            Some(_) => Ok(true),
            None => Err(AdvisorError::NotFound(format!("agent {}", id))),
        }
    }

    async fn create_thread(&self) -> Result<String, AdvisorError> {
        let id = self.next_id("thread");
        self.threads.lock().insert(id.clone());
        Ok(id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, AdvisorError> {
        self.pending.lock().remove(thread_id);
        if self.threads.lock().remove(thread_id) {
            self.deleted_threads.lock().push(thread_id.to_string());
            Ok(true)
        } else {
            Err(AdvisorError::NotFound(format!("thread {}", thread_id)))
        }
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        _agent: &AgentDefinition,
        input: TurnInput,
        _capabilities: &[CapabilityDescriptor],
    ) -> Result<NextStep, AdvisorError> {
        if !self.threads.lock().contains(thread_id) {
            return Err(AdvisorError::NotFound(format!("thread {}", thread_id)));
        }
        self.inputs
            .lock()
            .push((thread_id.to_string(), input.clone()));

        // Yield so concurrent conversations interleave at every engine step
        tokio::task::yield_now().await;

        let mut pending = self.pending.lock();
        if let TurnInput::User(text) = &input {
            if self.failures.lock().contains(text) {
                return Err(AdvisorError::EngineUnavailable("scripted outage".into()));
            }
            let steps = self.scripts.lock().get(text).cloned().unwrap_or_default();
            pending.insert(thread_id.to_string(), steps.into());
        }

        Ok(pending
            .get_mut(thread_id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(NextStep::EndOfStream))
    }
}
