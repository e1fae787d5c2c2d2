//! MCP tool catalog over HTTP
//!
//! JSON-RPC 2.0 requests are POSTed to a single endpoint. Servers may answer
//! with plain JSON or with an event stream whose `data:` lines carry the
//! response, so both are accepted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{RemoteToolSpec, ToolCatalog};
use crate::capability::Arguments;
use crate::constants::{http, mcp};
use crate::error::AdvisorError;

const SESSION_HEADER: &str = "mcp-session-id";
const SUBSCRIPTION_KEY_HEADER: &str = "ocp-apim-subscription-key";

/// JSON-RPC request
#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC notification (no id)
#[derive(Debug, Serialize)]
struct Notification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
}

/// JSON-RPC response
#[derive(Debug, Deserialize)]
struct Response {
    id: Option<i64>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Connection settings for an MCP server
#[derive(Debug, Clone, Default)]
pub struct McpSettings {
    pub endpoint: String,
    /// Sent as `Ocp-Apim-Subscription-Key`
    pub subscription_key: Option<String>,
    /// Sent as `Authorization: Bearer ...`
    pub bearer_token: Option<String>,
}

/// Tool catalog backed by an MCP server
pub struct McpCatalog {
    http: Client,
    endpoint: String,
    headers: HeaderMap,
    next_id: AtomicI64,
    session_id: RwLock<Option<String>>,
}

impl McpCatalog {
    pub fn new(settings: McpSettings) -> Result<Self, AdvisorError> {
        let http = Client::builder()
            .connect_timeout(http::CONNECT_TIMEOUT)
            .timeout(http::REQUEST_TIMEOUT)
            .user_agent(http::USER_AGENT)
            .build()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = settings.subscription_key.as_deref() {
            headers.insert(SUBSCRIPTION_KEY_HEADER, header_value(key)?);
        }
        if let Some(token) = settings.bearer_token.as_deref() {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
        }

        Ok(Self {
            http,
            endpoint: settings.endpoint,
            headers,
            next_id: AtomicI64::new(1),
            session_id: RwLock::new(None),
        })
    }

    /// Create a catalog and run the initialize handshake
    pub async fn connect(settings: McpSettings) -> Result<Self, AdvisorError> {
        let catalog = Self::new(settings)?;
        catalog.initialize().await?;
        Ok(catalog)
    }

    async fn initialize(&self) -> Result<(), AdvisorError> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": mcp::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": mcp::CLIENT_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;
        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server, endpoint = %self.endpoint, "MCP server initialized");

        self.notify("notifications/initialized").await
    }

    fn post(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body);
        if let Some(session) = self.session_id.read().as_deref() {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    /// Send a request and wait for its result
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, AdvisorError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;
        debug!("MCP request [{}]: {}", id, method);

        let response = self.post(body).send().await?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_string());
        }

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AdvisorError::EngineUnavailable(format!(
                "MCP {} returned {}: {}",
                method, status, text
            )));
        }
        parse_response(&text, id)
    }

    /// Send a notification (no response expected)
    async fn notify(&self, method: &str) -> Result<(), AdvisorError> {
        let body = serde_json::to_string(&Notification {
            jsonrpc: "2.0",
            method,
        })?;
        debug!("MCP notification: {}", method);
        let response = self.post(body).send().await?;
        if !response.status().is_success() {
            return Err(AdvisorError::EngineUnavailable(format!(
                "MCP {} returned {}",
                method,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolCatalog for McpCatalog {
    async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, AdvisorError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        for _ in 0..mcp::MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self
                .request("tools/list", params)
                .await
                .map_err(|e| AdvisorError::ToolDiscovery(e.to_string()))?;
            tools.extend(parse_tools(&result));
            cursor = match result.get("nextCursor").and_then(Value::as_str) {
                None => return Ok(tools),
                Some(next) if !seen.insert(next.to_string()) => {
                    warn!(cursor = next, "MCP server repeated a tools/list cursor");
                    return Ok(tools);
                }
                Some(next) => Some(next.to_string()),
            };
        }
        warn!(
            pages = mcp::MAX_LIST_PAGES,
            "Stopped paging tools/list at the page limit"
        );
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: &Arguments) -> Result<String, AdvisorError> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await
            .map_err(|e| AdvisorError::capability(name, e))?;
        parse_call_result(name, &result)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, AdvisorError> {
    HeaderValue::from_str(value)
        .map_err(|e| AdvisorError::Config(format!("invalid catalog header value: {}", e)))
}

/// Extract the JSON-RPC response for `id` from a JSON or event-stream body
fn parse_response(body: &str, id: i64) -> Result<Value, AdvisorError> {
    let trimmed = body.trim_start();
    let candidates: Vec<&str> = if trimmed.starts_with('{') {
        vec![trimmed]
    } else {
        trimmed
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| !data.is_empty())
            .collect()
    };

    for candidate in candidates {
        let Ok(response) = serde_json::from_str::<Response>(candidate) else {
            continue;
        };
        if response.id != Some(id) {
            continue;
        }
        if let Some(error) = response.error {
            return Err(AdvisorError::EngineUnavailable(format!(
                "MCP error {}: {}",
                error.code, error.message
            )));
        }
        return Ok(response.result.unwrap_or(Value::Null));
    }
    Err(AdvisorError::EngineUnavailable(format!(
        "no MCP response for request {}",
        id
    )))
}

fn parse_tools(result: &Value) -> Vec<RemoteToolSpec> {
    result
        .get("tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name").and_then(Value::as_str)?;
                    let description = tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let schema = tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                    Some(RemoteToolSpec::from_schema(name, description, schema))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Join the text content of a `tools/call` result
fn parse_call_result(name: &str, result: &Value) -> Result<String, AdvisorError> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(AdvisorError::capability(name, text));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_response() {
        let body = r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#;
        assert_eq!(parse_response(body, 3).unwrap(), json!({"tools": []}));
        assert!(parse_response(body, 4).is_err());
    }

    #[test]
    fn test_parse_event_stream_response() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        assert_eq!(parse_response(body, 7).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_parse_error_response() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        let err = parse_response(body, 1).unwrap_err();
        assert!(err.to_string().contains("Method not found"));
    }

    #[test]
    fn test_parse_tools() {
        let result = json!({
            "tools": [
                {
                    "name": "get_tariff",
                    "description": "Current tariff",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"plan": {"type": "string"}},
                        "required": ["plan"]
                    }
                },
                {"name": "ping"},
                {"description": "nameless"}
            ]
        });

        let tools = parse_tools(&result);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_tariff");
        assert!(tools[0].parameters[0].required);
        assert_eq!(tools[1].description, "");
        assert!(tools[1].parameters.is_empty());
    }

    #[test]
    fn test_parse_call_result() {
        let ok = json!({"content": [
            {"type": "text", "text": "0.30 EUR/kWh"},
            {"type": "image", "data": "..."},
            {"type": "text", "text": "valid until June"}
        ]});
        assert_eq!(
            parse_call_result("get_tariff", &ok).unwrap(),
            "0.30 EUR/kWh\nvalid until June"
        );

        let failed = json!({"isError": true, "content": [{"type": "text", "text": "unknown plan"}]});
        let err = parse_call_result("get_tariff", &failed).unwrap_err();
        assert_eq!(err.to_string(), "capability 'get_tariff' failed: unknown plan");
    }

    /// Answer every JSON-RPC request, echoing its id; `tools/list` always
    /// hands back the same cursor
    fn looping_server(request: &wiremock::Request) -> wiremock::ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let Some(id) = body.get("id").cloned() else {
            return wiremock::ResponseTemplate::new(202);
        };
        let result = match body["method"].as_str() {
            Some("initialize") => json!({"serverInfo": {"name": "tariffs"}}),
            Some("tools/list") => {
                let page = body
                    .pointer("/params/cursor")
                    .and_then(Value::as_str)
                    .unwrap_or("first");
                json!({"tools": [{"name": format!("tool_{}", page)}], "nextCursor": "again"})
            }
            _ => json!({"content": [{"type": "text", "text": "0.30 EUR/kWh"}]}),
        };
        wiremock::ResponseTemplate::new(200)
            .insert_header(SESSION_HEADER, "session-1")
            .set_body_json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }

    #[tokio::test]
    async fn test_list_tools_stops_on_repeated_cursor() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(looping_server)
            .mount(&server)
            .await;

        let catalog = McpCatalog::connect(McpSettings {
            endpoint: server.uri(),
            subscription_key: Some("key".into()),
            bearer_token: None,
        })
        .await
        .unwrap();
        let tools = tokio::time::timeout(std::time::Duration::from_secs(5), catalog.list_tools())
            .await
            .expect("listing should terminate")
            .unwrap();

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["tool_first", "tool_again"]);

        let requests = server.received_requests().await.unwrap_or_default();
        // initialize, initialized notification, two list pages
        assert_eq!(requests.len(), 4);
        let last = requests.last().unwrap();
        assert!(last.headers.get(SESSION_HEADER).is_some());
        assert!(last.headers.get(SUBSCRIPTION_KEY_HEADER).is_some());

        let text = catalog.call_tool("get_tariff", &Arguments::new()).await.unwrap();
        assert_eq!(text, "0.30 EUR/kWh");
    }

    #[test]
    fn test_new_rejects_invalid_header() {
        let result = McpCatalog::new(McpSettings {
            endpoint: "http://localhost:1/mcp".into(),
            subscription_key: Some("bad\nvalue".into()),
            bearer_token: None,
        });
        assert!(matches!(result, Err(AdvisorError::Config(_))));
    }
}
