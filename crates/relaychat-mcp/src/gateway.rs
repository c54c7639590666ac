//! Tool invocation gateway.
//!
//! The gateway is the session-facing surface of the subsystem: it
//! presents the merged toolset of all running servers and routes tool
//! calls to the right one. Invocation never returns `Err`; every
//! outcome, including a missing tool or a dead server, is folded into a
//! [`ToolResult`] the caller can hand back to the session.
//!
//! The gateway observes failures but never mutates state itself. When a
//! call reveals a dead connection, it reports that to the lifecycle
//! manager, which owns the handle map and the registry.

use crate::error::McpError;
use crate::handle::ServerState;
use crate::lifecycle::McpLifecycleManager;
use crate::protocol::ToolContent;
use crate::registry::Capability;
use relaychat_util::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A tool call requested by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this call, used to correlate results and logs.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl ToolCall {
    /// Create a tool call with a fresh call id.
    pub fn new(name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            call_id: Identifier::call(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of a tool call, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    /// The tool that was called.
    pub tool: String,
    /// The server that handled the call, if routing got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Content returned by the tool. Empty on routing failures.
    pub content: Vec<ToolContent>,
    /// Error description if the call failed or the tool reported an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the call.
    pub duration_ms: u64,
}

impl ToolResult {
    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Routes tool calls from sessions to running MCP servers.
pub struct McpGateway {
    lifecycle: Arc<McpLifecycleManager>,
}

impl McpGateway {
    /// Create a gateway over a lifecycle manager.
    pub fn new(lifecycle: Arc<McpLifecycleManager>) -> Self {
        Self { lifecycle }
    }

    /// The merged toolset currently available to a session.
    ///
    /// Deterministic order: server registration order, then tool name.
    pub async fn toolset_for_session(&self) -> Vec<Capability> {
        self.lifecycle.registry().read().await.all()
    }

    /// Invoke a tool by name.
    pub async fn invoke_tool(&self, name: &str, arguments: Option<Value>) -> ToolResult {
        self.invoke_call(ToolCall::new(name, arguments)).await
    }

    /// Invoke a prepared tool call.
    pub async fn invoke_call(&self, call: ToolCall) -> ToolResult {
        let started = Instant::now();
        let ToolCall {
            call_id,
            name,
            arguments,
        } = call;

        let server = {
            let registry = self.lifecycle.registry();
            let found = registry.read().await.find(&name).map(|c| c.server.clone());
            match found {
                Some(server) => server,
                None => {
                    return self.finish(ToolResult {
                        call_id,
                        tool: name.clone(),
                        server: None,
                        content: Vec::new(),
                        error: Some(McpError::ToolNotFound(name).to_string()),
                        duration_ms: elapsed_ms(started),
                    });
                }
            }
        };

        let Some(handle) = self.lifecycle.handle(&server).await else {
            return self.finish(ToolResult {
                call_id,
                tool: name,
                server: Some(server.clone()),
                content: Vec::new(),
                error: Some(McpError::ServerNotFound(server).to_string()),
                duration_ms: elapsed_ms(started),
            });
        };

        if handle.state() != ServerState::Running {
            return self.finish(ToolResult {
                call_id,
                tool: name,
                server: Some(server.clone()),
                content: Vec::new(),
                error: Some(McpError::ServerUnavailable(server).to_string()),
                duration_ms: elapsed_ms(started),
            });
        }

        match handle.invoke(&name, arguments).await {
            Ok(result) => {
                // A server-side tool error still carries content (usually a
                // textual explanation); keep it for the session.
                let error = result
                    .is_error
                    .then(|| describe_tool_error(&result.content));
                self.finish(ToolResult {
                    call_id,
                    tool: name,
                    server: Some(server),
                    content: result.content,
                    error,
                    duration_ms: elapsed_ms(started),
                })
            }
            Err(e) => {
                if e.is_connection_failure() {
                    self.lifecycle.mark_failed(&server, &e).await;
                }
                // A timeout leaves the server running; the next call may
                // succeed.
                self.finish(ToolResult {
                    call_id,
                    tool: name,
                    server: Some(server),
                    content: Vec::new(),
                    error: Some(e.to_string()),
                    duration_ms: elapsed_ms(started),
                })
            }
        }
    }

    fn finish(&self, result: ToolResult) -> ToolResult {
        if result.is_success() {
            info!(
                call_id = %result.call_id,
                tool = %result.tool,
                server = result.server.as_deref(),
                duration_ms = result.duration_ms,
                "tool call completed"
            );
        } else {
            warn!(
                call_id = %result.call_id,
                tool = %result.tool,
                server = result.server.as_deref(),
                duration_ms = result.duration_ms,
                error = result.error.as_deref(),
                "tool call failed"
            );
        }
        result
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn describe_tool_error(content: &[ToolContent]) -> String {
    content
        .iter()
        .find_map(|item| match item {
            ToolContent::Text { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "tool reported an error".to_string())
}
