//! Stdio transport for local MCP servers.
//!
//! Spawns the configured command as a child process and speaks
//! newline-delimited JSON-RPC over its stdin/stdout pipes. One request is
//! in flight per pipe pair; responses are matched to requests by id, so a
//! stale response left over from a timed-out call is skipped rather than
//! corrupting the next exchange.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Stdio transport configuration.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Extra environment variables, merged over the parent environment.
    pub env: HashMap<String, String>,
    /// Backstop timeout for a single request round trip. Callers apply
    /// their own (usually tighter) deadlines on top of this.
    pub request_timeout: Duration,
    /// How long to wait for the child to exit on close before killing it.
    pub shutdown_grace: Duration,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// A running child process with its pipes.
struct StdioProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Stdio transport for local MCP servers.
pub struct StdioTransport {
    config: StdioConfig,
    process: Mutex<Option<StdioProcess>>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured command and wrap its pipes in a transport.
    pub fn spawn(config: StdioConfig) -> McpResult<Self> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            McpError::transport(format!("failed to spawn '{}': {e}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport("failed to capture child stdout"))?;

        debug!(command = %config.command, pid = ?child.id(), "spawned MCP server process");

        Ok(Self {
            config,
            process: Mutex::new(Some(StdioProcess {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
            connected: AtomicBool::new(true),
        })
    }

    /// Write a request and read lines until the matching response arrives.
    async fn exchange(
        process: &mut StdioProcess,
        request: &JsonRpcRequest,
        request_timeout: Duration,
    ) -> McpResult<JsonRpcResponse> {
        let id = request.id.unwrap_or_default();
        Self::write_frame(process, request).await?;

        match timeout(request_timeout, Self::read_response(process, id)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout),
        }
    }

    async fn write_frame<T: serde::Serialize>(
        process: &mut StdioProcess,
        frame: &T,
    ) -> McpResult<()> {
        let mut payload = serde_json::to_vec(frame)?;
        payload.push(b'\n');
        process
            .stdin
            .write_all(&payload)
            .await
            .map_err(|e| McpError::transport(format!("failed to write to server: {e}")))?;
        process
            .stdin
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("failed to flush stdin: {e}")))?;
        Ok(())
    }

    async fn read_response(process: &mut StdioProcess, id: u64) -> McpResult<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = process
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::transport(format!("failed to read from server: {e}")))?;
            if read == 0 {
                return Err(McpError::transport("server closed stdout"));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(_) => {
                    warn!("skipping unparseable line from MCP server");
                    continue;
                }
            };

            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(serde_json::from_value(value)?);
            }

            // Server-initiated notification, or a stale response from a
            // timed-out call. Skipping it keeps the framing in sync.
            debug!(
                method = value.get("method").and_then(serde_json::Value::as_str),
                "ignoring unmatched stdio message"
            );
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let mut guard = self.process.lock().await;
        let process = guard
            .as_mut()
            .ok_or_else(|| McpError::transport("stdio transport is closed"))?;

        debug!(id = ?request.id, method = %request.method, "sending stdio request");

        let result = Self::exchange(process, &request, self.config.request_timeout).await;
        if let Err(ref error) = result {
            if error.is_connection_failure() {
                // The pipe is broken; drop the child so later calls fail fast.
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let mut guard = self.process.lock().await;
        let process = guard
            .as_mut()
            .ok_or_else(|| McpError::transport("stdio transport is closed"))?;

        debug!(method = %notification.method, "sending stdio notification");
        Self::write_frame(process, &notification).await
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);

        let Some(process) = self.process.lock().await.take() else {
            return Ok(());
        };

        let StdioProcess {
            mut child,
            stdin,
            stdout,
        } = process;

        // Closing stdin signals the server to exit.
        drop(stdin);
        drop(stdout);

        match timeout(self.config.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed waiting for MCP server process");
                let _ = child.start_kill();
            }
            Err(_) => {
                warn!(
                    command = %self.config.command,
                    "MCP server process ignored shutdown, killing it"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
