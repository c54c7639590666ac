//! Per-server handle and state machine.
//!
//! A [`ServerHandle`] owns one server's transport, runs the MCP startup
//! handshake, and carries the server through its lifecycle states:
//!
//! ```text
//! Unstarted -> Starting -> Running -> Stopping -> Stopped
//!                  |          |
//!                  +-> Failed <+
//! ```
//!
//! `Failed` and `Stopped` are terminal until an explicit restart builds a
//! fresh handle. All state transitions go through the lifecycle manager;
//! the handle itself never decides to restart.

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, McpTool, ServerInfo, ToolCallResult,
};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use relaychat_util::Identifier;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Known from configuration but never started.
    Unstarted,
    /// Transport connect and handshake in progress.
    Starting,
    /// Handshake complete; tools are registered and invokable.
    Running,
    /// Graceful stop in progress.
    Stopping,
    /// Stopped deliberately. Terminal until restart.
    Stopped,
    /// Startup or connection failure. Terminal until restart.
    Failed,
}

/// Point-in-time status snapshot for display and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub tool_count: usize,
    pub last_seen: DateTime<Utc>,
}

struct HandleInner {
    state: ServerState,
    last_error: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    tools: Vec<McpTool>,
    server_info: Option<ServerInfo>,
    last_seen: DateTime<Utc>,
}

/// Handle to one managed MCP server.
pub struct ServerHandle {
    /// Unique id for this handle instance. A restart mints a new one.
    pub instance_id: String,
    config: ServerConfig,
    next_id: AtomicU64,
    inner: RwLock<HandleInner>,
}

impl ServerHandle {
    /// Create a handle in the `Unstarted` state.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            instance_id: Identifier::server(),
            config,
            next_id: AtomicU64::new(1),
            inner: RwLock::new(HandleInner {
                state: ServerState::Unstarted,
                last_error: None,
                transport: None,
                tools: Vec::new(),
                server_info: None,
                last_seen: Utc::now(),
            }),
        }
    }

    /// The configuration this handle was built from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.read().expect("handle lock poisoned").state
    }

    /// Point-in-time status snapshot.
    pub fn status(&self) -> ServerStatus {
        let inner = self.inner.read().expect("handle lock poisoned");
        ServerStatus {
            name: self.config.name.clone(),
            state: inner.state,
            last_error: inner.last_error.clone(),
            tool_count: inner.tools.len(),
            last_seen: inner.last_seen,
        }
    }

    /// Tools advertised by the server, sorted by name.
    pub fn tools(&self) -> Vec<McpTool> {
        self.inner.read().expect("handle lock poisoned").tools.clone()
    }

    /// Info the server reported during the handshake, if any.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner
            .read()
            .expect("handle lock poisoned")
            .server_info
            .clone()
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn transport(&self) -> McpResult<Arc<dyn Transport>> {
        self.inner
            .read()
            .expect("handle lock poisoned")
            .transport
            .clone()
            .ok_or_else(|| McpError::ServerUnavailable(self.config.name.clone()))
    }

    /// Move to `Starting` before the transport exists. The lifecycle
    /// manager calls this while inserting the handle into its map, so a
    /// concurrent start for the same name sees the handle as active.
    pub(crate) fn mark_starting(&self) {
        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.state = ServerState::Starting;
        inner.last_seen = Utc::now();
    }

    /// Force the handle to `Stopped` when a graceful close is abandoned.
    /// The transport is dropped without waiting for it.
    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.state = ServerState::Stopped;
        inner.tools.clear();
        inner.transport = None;
        inner.last_seen = Utc::now();
    }

    /// Attach a freshly connected transport and move to `Starting`.
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.transport = Some(transport);
        inner.state = ServerState::Starting;
        inner.last_seen = Utc::now();
    }

    /// Run the MCP startup handshake.
    ///
    /// Sends `initialize`, acknowledges with `notifications/initialized`,
    /// then lists the server's tools. On success the handle is `Running`.
    /// The whole sequence is bounded by the configured startup timeout;
    /// failures leave the handle for the lifecycle manager to mark failed.
    pub async fn handshake(&self) -> McpResult<()> {
        let deadline = Duration::from_secs(self.config.timeout_secs);
        timeout(deadline, self.handshake_inner())
            .await
            .map_err(|_| McpError::Timeout)?
    }

    async fn handshake_inner(&self) -> McpResult<()> {
        let transport = self.transport()?;

        let params = serde_json::to_value(InitializeParams::default())?;
        let request = JsonRpcRequest::new(self.next_request_id(), "initialize", Some(params));
        let response = transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::handshake(format!(
                "initialize rejected: {} (code {})",
                error.message, error.code
            )));
        }
        let result: InitializeResult = response
            .result
            .ok_or_else(|| McpError::handshake("initialize returned no result"))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| McpError::handshake(format!("malformed initialize result: {e}")))
            })?;

        debug!(
            server = %self.config.name,
            peer = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP handshake accepted"
        );

        transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        let tools = self.list_tools(&transport).await?;

        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.server_info = Some(result.server_info);
        inner.tools = tools;
        inner.state = ServerState::Running;
        inner.last_error = None;
        inner.last_seen = Utc::now();
        Ok(())
    }

    async fn list_tools(&self, transport: &Arc<dyn Transport>) -> McpResult<Vec<McpTool>> {
        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = transport.request(request).await?;

        if let Some(error) = response.error {
            // A server without tools is still usable; it just contributes
            // nothing to the registry.
            warn!(
                server = %self.config.name,
                error = %error.message,
                "server rejected tools/list, treating as empty"
            );
            return Ok(Vec::new());
        }

        let result: ListToolsResult = response
            .result
            .ok_or_else(|| McpError::handshake("tools/list returned no result"))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| McpError::handshake(format!("malformed tools/list result: {e}")))
            })?;

        let mut tools = result.tools;
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Invoke a tool on this server.
    ///
    /// Bounded by the configured tool-call timeout. A timeout is returned
    /// as an error but does not change the handle's state; the server may
    /// just be slow, and the next call may succeed.
    pub async fn invoke(&self, tool: &str, arguments: Option<serde_json::Value>) -> McpResult<ToolCallResult> {
        let transport = self.transport()?;
        let params = serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments,
        })?;
        let request = JsonRpcRequest::new(self.next_request_id(), "tools/call", Some(params));

        let deadline = Duration::from_secs(self.config.tool_timeout_secs);
        let response = timeout(deadline, transport.request(request))
            .await
            .map_err(|_| McpError::Timeout)??;

        if let Some(error) = response.error {
            return Err(McpError::invocation(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }

        let result: ToolCallResult = response
            .result
            .ok_or_else(|| McpError::invocation("tools/call returned no result"))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| McpError::invocation(format!("malformed tool result: {e}")))
            })?;

        self.inner.write().expect("handle lock poisoned").last_seen = Utc::now();
        Ok(result)
    }

    /// Mark the handle failed, recording the error.
    ///
    /// Clears the tool list so stale capabilities cannot be advertised
    /// for a dead server.
    pub fn mark_failed(&self, error: &McpError) {
        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.state = ServerState::Failed;
        inner.last_error = Some(error.to_string());
        inner.tools.clear();
        inner.last_seen = Utc::now();
    }

    /// Drop and close the transport without changing state. Used for
    /// cleanup after a failed start, where the state must stay `Failed`.
    pub(crate) async fn close_transport(&self) -> McpResult<()> {
        let transport = self
            .inner
            .write()
            .expect("handle lock poisoned")
            .transport
            .take();
        if let Some(transport) = transport {
            transport.close().await?;
        }
        Ok(())
    }

    /// Gracefully close the transport and move to `Stopped`.
    pub async fn close(&self) -> McpResult<()> {
        let transport = {
            let mut inner = self.inner.write().expect("handle lock poisoned");
            inner.state = ServerState::Stopping;
            inner.tools.clear();
            inner.transport.take()
        };

        if let Some(transport) = transport {
            transport.close().await?;
        }

        let mut inner = self.inner.write().expect("handle lock poisoned");
        inner.state = ServerState::Stopped;
        inner.last_seen = Utc::now();
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.config.name)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use relaychat_util::id::IdPrefix;

    fn running_handle(fake: FakeTransport) -> ServerHandle {
        let handle = ServerHandle::new(ServerConfig::stdio("search", "search-server"));
        handle.attach_transport(Arc::new(fake));
        handle
    }

    #[test]
    fn test_new_handle_is_unstarted() {
        let handle = ServerHandle::new(ServerConfig::stdio("search", "search-server"));
        assert_eq!(handle.state(), ServerState::Unstarted);
        assert!(handle.tools().is_empty());
        assert!(Identifier::has_prefix(&handle.instance_id, IdPrefix::Server));
    }

    #[tokio::test]
    async fn test_handshake_reaches_running() {
        let fake = FakeTransport::new().with_tools(vec!["web_search", "fetch_page"]);
        let handle = running_handle(fake);
        assert_eq!(handle.state(), ServerState::Starting);

        handle.handshake().await.unwrap();
        assert_eq!(handle.state(), ServerState::Running);

        // Tools come back sorted by name.
        let names: Vec<_> = handle.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["fetch_page", "web_search"]);
        assert_eq!(handle.server_info().unwrap().name, "fake-server");
    }

    #[tokio::test]
    async fn test_handshake_initialize_rejected() {
        let fake = FakeTransport::new().with_init_error("unsupported protocol");
        let handle = running_handle(fake);

        let err = handle.handshake().await.unwrap_err();
        assert!(matches!(err, McpError::Handshake(_)));
        // The handle stays in Starting; the lifecycle manager decides
        // what to do with the failure.
        assert_eq!(handle.state(), ServerState::Starting);
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let fake = FakeTransport::new().with_delay(Duration::from_secs(30));
        let handle = ServerHandle::new(
            ServerConfig::stdio("slow", "slow-server").with_timeout(1),
        );
        handle.attach_transport(Arc::new(fake));

        let err = handle.handshake().await.unwrap_err();
        assert!(matches!(err, McpError::Timeout));
    }

    #[tokio::test]
    async fn test_tools_list_error_yields_empty_toolset() {
        let fake = FakeTransport::new().with_tools_error("method not found");
        let handle = running_handle(fake);

        handle.handshake().await.unwrap();
        assert_eq!(handle.state(), ServerState::Running);
        assert!(handle.tools().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let fake = FakeTransport::new().with_tools(vec!["web_search"]);
        let handle = running_handle(fake);
        handle.handshake().await.unwrap();

        let result = handle
            .invoke("web_search", Some(serde_json::json!({"query": "rust"})))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_timeout_does_not_change_state() {
        let fake = FakeTransport::new()
            .with_tools(vec!["web_search"])
            .with_call_delay(Duration::from_secs(30));
        let handle = ServerHandle::new(
            ServerConfig::stdio("search", "search-server").with_tool_timeout(1),
        );
        handle.attach_transport(Arc::new(fake));
        handle.handshake().await.unwrap();

        let err = handle.invoke("web_search", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout));
        assert_eq!(handle.state(), ServerState::Running);
        assert_eq!(handle.tools().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_failed_clears_tools() {
        let fake = FakeTransport::new().with_tools(vec!["web_search"]);
        let handle = running_handle(fake);
        handle.handshake().await.unwrap();

        handle.mark_failed(&McpError::transport("connection reset"));
        assert_eq!(handle.state(), ServerState::Failed);
        assert!(handle.tools().is_empty());
        let status = handle.status();
        assert_eq!(status.last_error.as_deref(), Some("transport error: connection reset"));
        assert_eq!(status.tool_count, 0);
    }

    #[tokio::test]
    async fn test_close_reaches_stopped() {
        let fake = FakeTransport::new().with_tools(vec!["web_search"]);
        let handle = running_handle(fake);
        handle.handshake().await.unwrap();

        handle.close().await.unwrap();
        assert_eq!(handle.state(), ServerState::Stopped);
        assert!(handle.tools().is_empty());

        // Invoking after close fails without a transport.
        let err = handle.invoke("web_search", None).await.unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable(_)));
    }

    #[test]
    fn test_status_serializes_snake_case_state() {
        let handle = ServerHandle::new(ServerConfig::stdio("search", "search-server"));
        let json = serde_json::to_string(&handle.status()).unwrap();
        assert!(json.contains("\"state\":\"unstarted\""));
    }
}
