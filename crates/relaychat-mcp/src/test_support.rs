//! In-process fakes shared by the lifecycle, handle, and gateway tests.

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, ServerCapabilities, ServerInfo, ToolCallResult, ToolContent,
    ToolsCapability, PROTOCOL_VERSION,
};
use crate::transport::{Transport, TransportFactory};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted in-process transport.
///
/// Answers the MCP handshake and tool calls from canned data, with
/// optional delays and failures injected per method.
pub struct FakeTransport {
    tools: Vec<String>,
    init_error: Option<String>,
    tools_error: Option<String>,
    tool_error: Option<String>,
    call_failure: Option<String>,
    delay: Option<Duration>,
    call_delay: Option<Duration>,
    close_delay: Option<Duration>,
    connected: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            init_error: None,
            tools_error: None,
            tool_error: None,
            call_failure: None,
            delay: None,
            call_delay: None,
            close_delay: None,
            connected: AtomicBool::new(true),
        }
    }

    /// Advertise these tools from `tools/list`.
    pub fn with_tools(mut self, tools: Vec<&str>) -> Self {
        self.tools = tools.into_iter().map(String::from).collect();
        self
    }

    /// Reject `initialize` with a JSON-RPC error.
    pub fn with_init_error(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    /// Reject `tools/list` with a JSON-RPC error.
    pub fn with_tools_error(mut self, message: &str) -> Self {
        self.tools_error = Some(message.to_string());
        self
    }

    /// Make `tools/call` return a result with `isError: true`.
    pub fn with_tool_error(mut self, message: &str) -> Self {
        self.tool_error = Some(message.to_string());
        self
    }

    /// Make `tools/call` fail with a transport error.
    pub fn with_call_failure(mut self, message: &str) -> Self {
        self.call_failure = Some(message.to_string());
        self
    }

    /// Delay every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only `tools/call` requests.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Stall `close`, like a child ignoring its shutdown signal.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    fn ok(id: u64, result: serde_json::Value) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: u64, message: &str) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: -32600,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

impl Clone for FakeTransport {
    fn clone(&self) -> Self {
        // A clone is a fresh connection to the same scripted server.
        Self {
            tools: self.tools.clone(),
            init_error: self.init_error.clone(),
            tools_error: self.tools_error.clone(),
            tool_error: self.tool_error.clone(),
            call_failure: self.call_failure.clone(),
            delay: self.delay,
            call_delay: self.call_delay,
            close_delay: self.close_delay,
            connected: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let id = request.id.unwrap_or_default();

        match request.method.as_str() {
            "initialize" => {
                if let Some(ref message) = self.init_error {
                    return Ok(Self::err(id, message));
                }
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability { list_changed: false }),
                        resources: None,
                    },
                    server_info: ServerInfo {
                        name: "fake-server".to_string(),
                        version: Some("0.0.1".to_string()),
                    },
                };
                Ok(Self::ok(id, serde_json::to_value(result)?))
            }
            "tools/list" => {
                if let Some(ref message) = self.tools_error {
                    return Ok(Self::err(id, message));
                }
                let result = ListToolsResult {
                    tools: self
                        .tools
                        .iter()
                        .map(|name| McpTool {
                            name: name.clone(),
                            description: Some(format!("{name} tool")),
                            input_schema: Some(serde_json::json!({"type": "object"})),
                        })
                        .collect(),
                };
                Ok(Self::ok(id, serde_json::to_value(result)?))
            }
            "tools/call" => {
                if let Some(delay) = self.call_delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some(ref message) = self.call_failure {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(McpError::transport(message.clone()));
                }
                let result = if let Some(ref message) = self.tool_error {
                    ToolCallResult {
                        content: vec![ToolContent::Text {
                            text: message.clone(),
                        }],
                        is_error: true,
                    }
                } else {
                    ToolCallResult {
                        content: vec![ToolContent::Text {
                            text: "ok".to_string(),
                        }],
                        is_error: false,
                    }
                };
                Ok(Self::ok(id, serde_json::to_value(result)?))
            }
            other => Ok(Self::err(id, &format!("unknown method: {other}"))),
        }
    }

    async fn notify(&self, _notification: JsonRpcNotification) -> McpResult<()> {
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Factory that hands out scripted transports by server name.
#[derive(Default)]
pub struct FakeFactory {
    transports: HashMap<String, FakeTransport>,
    connect_errors: HashMap<String, String>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this transport for the named server. Each connect hands out
    /// a fresh clone, so a restart gets a working connection again.
    pub fn with_transport(mut self, name: &str, transport: FakeTransport) -> Self {
        self.transports.insert(name.to_string(), transport);
        self
    }

    /// Fail connects for the named server.
    pub fn with_connect_error(mut self, name: &str, message: &str) -> Self {
        self.connect_errors.insert(name.to_string(), message.to_string());
        self
    }
}

impl TransportFactory for FakeFactory {
    fn connect(&self, config: &ServerConfig) -> McpResult<Arc<dyn Transport>> {
        if let Some(message) = self.connect_errors.get(&config.name) {
            return Err(McpError::transport(message.clone()));
        }
        self.transports
            .get(&config.name)
            .map(|t| Arc::new(t.clone()) as Arc<dyn Transport>)
            .ok_or_else(|| {
                McpError::transport(format!("no scripted transport for '{}'", config.name))
            })
    }
}
