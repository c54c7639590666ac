//! Streamable HTTP transport for remote MCP servers.
//!
//! Requests go out as HTTP POST; the server may answer with a plain JSON
//! body or with an SSE event stream carrying the response frame. There is
//! no automatic reconnect; the lifecycle manager decides what to do when
//! a connection dies.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Streamable HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// The server URL (e.g., `https://mcp.example.com/mcp`)
    pub url: String,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: HashMap::new(),
            timeout_secs: 60,
        }
    }
}

/// Streamable HTTP transport for remote MCP servers.
pub struct StreamableHttpTransport {
    config: HttpConfig,
    client: Client,
    connected: AtomicBool,
    /// Session ID assigned by the server, echoed back on later requests.
    session_id: RwLock<Option<String>>,
}

impl StreamableHttpTransport {
    /// Create a new streamable HTTP transport.
    pub fn new(config: HttpConfig) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| McpError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    /// Build a request with common headers.
    async fn build_request(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        if let Some(ref session_id) = *self.session_id.read().await {
            req = req.header("Mcp-Session-Id", session_id);
        }

        req
    }

    /// Remember the session id if the server assigned one.
    async fn capture_session_id(&self, response: &reqwest::Response) {
        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write().await = Some(id.to_string());
            }
        }
    }

    /// Parse a response body that may be plain JSON or an SSE stream.
    async fn parse_response(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(McpError::transport(format!(
                "server rejected request: {status}"
            )));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::handshake(format!(
                "server returned {status}: {text}"
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.parse_sse_stream(response).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::transport(format!("failed to read response: {e}")))?;

            serde_json::from_str(&text)
                .map_err(|e| McpError::handshake(format!("invalid JSON response: {e}")))
        }
    }

    /// Scan an SSE stream for the JSON-RPC response frame.
    async fn parse_sse_stream(&self, response: reqwest::Response) -> McpResult<JsonRpcResponse> {
        use futures::StreamExt;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result
                .map_err(|e| McpError::transport(format!("stream error: {e}")))?;

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for line in buffer.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(data) {
                        return Ok(response);
                    }
                }
            }

            // Keep only the trailing incomplete line.
            if let Some(last_newline) = buffer.rfind('\n') {
                buffer = buffer[last_newline + 1..].to_string();
            }
        }

        Err(McpError::transport("SSE stream ended without a response"))
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let request_json = serde_json::to_string(&request)?;

        debug!(id = ?request.id, method = %request.method, "sending HTTP request");

        let response = self
            .build_request(request_json)
            .await
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else {
                    McpError::transport(format!("request failed: {e}"))
                }
            })?;

        self.capture_session_id(&response).await;
        self.connected.store(true, Ordering::SeqCst);
        self.parse_response(response).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let notification_json = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "sending HTTP notification");

        let response = self
            .build_request(notification_json)
            .await
            .send()
            .await
            .map_err(|e| McpError::transport(format!("notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "notification returned non-success status");
        }

        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.write().await = None;
        debug!("closed streamable HTTP transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
