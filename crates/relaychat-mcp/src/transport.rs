//! MCP transport abstraction.

use crate::config::{ServerConfig, TransportKind};
use crate::error::{McpError, McpResult};
use crate::http::{HttpConfig, StreamableHttpTransport};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::stdio::{StdioConfig, StdioTransport};
use async_trait::async_trait;
use std::sync::Arc;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;

    /// Close the transport, releasing any held resources.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Builds transports from server configurations.
///
/// The lifecycle manager goes through this seam so tests can substitute
/// in-process fakes for real subprocesses and HTTP connections.
pub trait TransportFactory: Send + Sync {
    /// Establish a connection for the given configuration.
    fn connect(&self, config: &ServerConfig) -> McpResult<Arc<dyn Transport>>;
}

/// Production factory: spawns subprocesses for `stdio` configs and
/// builds HTTP clients for `streamable_http` configs.
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn connect(&self, config: &ServerConfig) -> McpResult<Arc<dyn Transport>> {
        match config.transport {
            TransportKind::Stdio => {
                let command = config.command.clone().ok_or_else(|| {
                    McpError::Config(format!(
                        "stdio server '{}' requires a command",
                        config.name
                    ))
                })?;
                let stdio = StdioConfig {
                    command,
                    args: config.args.clone(),
                    env: config.env.clone(),
                    ..StdioConfig::default()
                };
                Ok(Arc::new(StdioTransport::spawn(stdio)?))
            }
            TransportKind::StreamableHttp => {
                let url = config.url.clone().ok_or_else(|| {
                    McpError::Config(format!(
                        "streamable_http server '{}' requires a url",
                        config.name
                    ))
                })?;
                let http = HttpConfig {
                    url,
                    headers: config.headers.clone(),
                    timeout_secs: config.tool_timeout_secs,
                };
                Ok(Arc::new(StreamableHttpTransport::new(http)?))
            }
        }
    }
}
