//! HTTP inference engine
//!
//! Talks to an assistants-style REST service:
//! - `/assistants` for agent definitions
//! - `/threads`, `/threads/{id}/messages` for conversation state
//! - `/threads/{id}/runs` for execution, polled until it needs tool output
//!   or completes
//!
//! A run that requests several tool calls at once is surfaced one
//! `CapabilitySelection` at a time. Outputs are buffered and submitted
//! together once the last one arrives.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::{AgentDefinition, CapabilityCall, InferenceEngine, NextStep, TurnInput};
use crate::capability::{Arguments, CapabilityDescriptor};
use crate::constants;
use crate::error::AdvisorError;

/// How to send the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    #[default]
    Bearer,
    /// `api-key: <key>`
    ApiKey,
}

/// Connection settings for the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Base URL, e.g. `https://<project>.services.ai.azure.com/api/projects/<name>`
    pub endpoint: String,
    /// Sent as the `api-version` query parameter when set
    pub api_version: Option<String>,
    pub auth: AuthScheme,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: None,
            auth: AuthScheme::Bearer,
            poll_interval: constants::engine::POLL_INTERVAL,
            run_timeout: constants::engine::RUN_TIMEOUT,
        }
    }
}

/// A run waiting for tool outputs
struct PendingRun {
    run_id: String,
    queued: VecDeque<CapabilityCall>,
    outputs: Vec<Value>,
}

/// Engine client over HTTP
pub struct HttpEngine {
    http: Client,
    settings: EngineSettings,
    credential: String,
    /// thread id -> run awaiting tool outputs
    pending: DashMap<String, PendingRun>,
}

impl HttpEngine {
    fn create_http_client() -> Client {
        Client::builder()
            .user_agent(constants::http::USER_AGENT)
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(constants::http::REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            })
    }

    pub fn new(settings: EngineSettings, credential: String) -> Self {
        Self {
            http: Self::create_http_client(),
            settings,
            credential,
            pending: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.endpoint.trim_end_matches('/'), path)
    }

    /// Build a request with authentication and api-version applied
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.http.request(method, self.url(path));

        request = match self.settings.auth {
            AuthScheme::Bearer => {
                request.header("authorization", format!("Bearer {}", self.credential))
            }
            AuthScheme::ApiKey => request.header("api-key", &self.credential),
        };

        if let Some(version) = &self.settings.api_version {
            request = request.query(&[("api-version", version)]);
        }

        request.header("content-type", "application/json")
    }

    /// Send a request and decode the JSON body
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value, AdvisorError> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AdvisorError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Engine error response: {} - {}", status, body);
            return Err(AdvisorError::EngineUnavailable(format!(
                "{} - {}",
                status, body
            )));
        }
        Ok(response.json::<Value>().await?)
    }

    async fn post_user_message(&self, thread_id: &str, text: &str) -> Result<(), AdvisorError> {
        let request = self
            .request(Method::POST, &format!("threads/{}/messages", thread_id))
            .json(&json!({"role": "user", "content": text}));
        self.send(request, &format!("thread {}", thread_id)).await?;
        Ok(())
    }

    async fn start_run(
        &self,
        thread_id: &str,
        agent: &AgentDefinition,
        capabilities: &[CapabilityDescriptor],
    ) -> Result<Value, AdvisorError> {
        let tools: Vec<Value> = capabilities.iter().map(function_tool).collect();
        let request = self
            .request(Method::POST, &format!("threads/{}/runs", thread_id))
            .json(&json!({"assistant_id": agent.id, "tools": tools}));
        self.send(request, &format!("thread {}", thread_id)).await
    }

    async fn submit_outputs(&self, thread_id: &str, pending: PendingRun) -> Result<Value, AdvisorError> {
        debug!(
            thread = thread_id,
            run = %pending.run_id,
            outputs = pending.outputs.len(),
            "Submitting tool outputs"
        );
        let request = self
            .request(
                Method::POST,
                &format!(
                    "threads/{}/runs/{}/submit_tool_outputs",
                    thread_id, pending.run_id
                ),
            )
            .json(&json!({"tool_outputs": pending.outputs}));
        self.send(request, &format!("run {}", pending.run_id)).await
    }

    /// Poll a run until it needs tool output or reaches a terminal state
    async fn advance(&self, thread_id: &str, mut run: Value) -> Result<NextStep, AdvisorError> {
        let started = Instant::now();
        loop {
            let run_id = str_field(&run, "id")?.to_string();
            let status = run
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            debug!(thread = thread_id, run = %run_id, status = %status, "Run status");

            match status.as_str() {
                "queued" | "in_progress" | "cancelling" => {
                    if started.elapsed() > self.settings.run_timeout {
                        return Err(AdvisorError::EngineUnavailable(format!(
                            "run {} did not finish within {}s",
                            run_id,
                            self.settings.run_timeout.as_secs()
                        )));
                    }
                    tokio::time::sleep(self.settings.poll_interval).await;
                    let request =
                        self.request(Method::GET, &format!("threads/{}/runs/{}", thread_id, run_id));
                    run = self.send(request, &format!("run {}", run_id)).await?;
                }
                "requires_action" => {
                    let mut queued: VecDeque<CapabilityCall> = parse_tool_calls(&run)?.into();
                    let first = queued.pop_front().ok_or_else(|| {
                        AdvisorError::EngineUnavailable(format!(
                            "run {} requires action but lists no tool calls",
                            run_id
                        ))
                    })?;
                    self.pending.insert(
                        thread_id.to_string(),
                        PendingRun {
                            run_id,
                            queued,
                            outputs: Vec::new(),
                        },
                    );
                    return Ok(NextStep::CapabilitySelection(first));
                }
                "completed" => return self.latest_reply(thread_id).await,
                other => {
                    let reason = run
                        .pointer("/last_error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("no error details");
                    return Err(AdvisorError::EngineUnavailable(format!(
                        "run {} ended with status '{}': {}",
                        run_id, other, reason
                    )));
                }
            }
        }
    }

    async fn latest_reply(&self, thread_id: &str) -> Result<NextStep, AdvisorError> {
        let request = self
            .request(Method::GET, &format!("threads/{}/messages", thread_id))
            .query(&[("order", "desc"), ("limit", "1")]);
        let messages = self.send(request, &format!("thread {}", thread_id)).await?;
        Ok(match parse_latest_reply(&messages) {
            Some(text) => NextStep::FinalReply(text),
            None => NextStep::EndOfStream,
        })
    }
}

#[async_trait]
impl InferenceEngine for HttpEngine {
    async fn create_definition(
        &self,
        model: &str,
        name: &str,
        instructions: &str,
        tools: &[CapabilityDescriptor],
    ) -> Result<AgentDefinition, AdvisorError> {
        let tools: Vec<Value> = tools.iter().map(function_tool).collect();
        let request = self.request(Method::POST, "assistants").json(&json!({
            "model": model,
            "name": name,
            "instructions": instructions,
            "tools": tools,
        }));
        let body = self.send(request, "assistants").await?;
        let definition = parse_definition(&body)?;
        info!(id = %definition.id, name = %definition.name, "Created agent definition");
        Ok(definition)
    }

    async fn get_definition(&self, id: &str) -> Result<AgentDefinition, AdvisorError> {
        let request = self.request(Method::GET, &format!("assistants/{}", id));
        let body = self.send(request, &format!("agent {}", id)).await?;
        parse_definition(&body)
    }

    async fn delete_definition(&self, id: &str) -> Result<bool, AdvisorError> {
        let request = self.request(Method::DELETE, &format!("assistants/{}", id));
        let body = self.send(request, &format!("agent {}", id)).await?;
        Ok(body.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn create_thread(&self) -> Result<String, AdvisorError> {
        let request = self.request(Method::POST, "threads").json(&json!({}));
        let body = self.send(request, "threads").await?;
        Ok(str_field(&body, "id")?.to_string())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<bool, AdvisorError> {
        self.pending.remove(thread_id);
        let request = self.request(Method::DELETE, &format!("threads/{}", thread_id));
        let body = self.send(request, &format!("thread {}", thread_id)).await?;
        Ok(body.get("deleted").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        agent: &AgentDefinition,
        input: TurnInput,
        capabilities: &[CapabilityDescriptor],
    ) -> Result<NextStep, AdvisorError> {
        match input {
            TurnInput::User(text) => {
                // A new user turn abandons any run still waiting on tool output
                self.pending.remove(thread_id);
                self.post_user_message(thread_id, &text).await?;
                let run = self.start_run(thread_id, agent, capabilities).await?;
                self.advance(thread_id, run).await
            }
            TurnInput::CapabilityOutput {
                call_id,
                output,
                is_error: _,
            } => {
                let (_, mut pending) = self.pending.remove(thread_id).ok_or_else(|| {
                    AdvisorError::EngineUnavailable(format!(
                        "no run on thread {} is waiting for tool output",
                        thread_id
                    ))
                })?;
                pending
                    .outputs
                    .push(json!({"tool_call_id": call_id, "output": output}));

                if let Some(next) = pending.queued.pop_front() {
                    self.pending.insert(thread_id.to_string(), pending);
                    return Ok(NextStep::CapabilitySelection(next));
                }

                let run = self.submit_outputs(thread_id, pending).await?;
                self.advance(thread_id, run).await
            }
        }
    }
}

/// Function tool definition in the engine's format
fn function_tool(descriptor: &CapabilityDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": descriptor.name,
            "description": descriptor.description,
            "parameters": descriptor.input_schema,
        }
    })
}

fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str, AdvisorError> {
    value.get(field).and_then(Value::as_str).ok_or_else(|| {
        AdvisorError::EngineUnavailable(format!("engine response is missing '{}'", field))
    })
}

fn parse_definition(body: &Value) -> Result<AgentDefinition, AdvisorError> {
    Ok(AgentDefinition {
        id: str_field(body, "id")?.to_string(),
        name: body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        instructions: body
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model: str_field(body, "model")?.to_string(),
    })
}

/// Extract function calls from a `requires_action` run
fn parse_tool_calls(run: &Value) -> Result<Vec<CapabilityCall>, AdvisorError> {
    let calls = run
        .pointer("/required_action/submit_tool_outputs/tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    calls
        .iter()
        .map(|call| -> Result<CapabilityCall, AdvisorError> {
            let raw_args = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments: Arguments = if raw_args.trim().is_empty() {
                Arguments::new()
            } else {
                serde_json::from_str(raw_args)?
            };
            Ok(CapabilityCall {
                call_id: str_field(call, "id")?.to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AdvisorError::EngineUnavailable("tool call without function name".into())
                    })?
                    .to_string(),
                arguments,
            })
        })
        .collect()
}

/// Text of the newest message if it was written by the assistant
fn parse_latest_reply(messages: &Value) -> Option<String> {
    let latest = messages.get("data")?.as_array()?.first()?;
    if latest.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    let text = latest
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|part| part.pointer("/text/value").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
