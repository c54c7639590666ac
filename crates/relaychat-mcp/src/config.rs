//! MCP server configuration.
//!
//! Server configurations describe how to reach a tool server: which
//! transport to use, how to spawn or address it, and the timeouts that
//! govern its startup and tool calls. The [`ConfigStore`] trait is the
//! seam between this subsystem and wherever configuration actually
//! lives (a settings file, a database, a UI).

use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Which transport a server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Local subprocess speaking newline-delimited JSON over stdin/stdout.
    Stdio,
    /// Remote endpoint speaking streamable HTTP.
    StreamableHttp,
}

/// Configuration for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name. Used as the registry key.
    pub name: String,
    /// Transport kind.
    pub transport: TransportKind,
    /// Command to run (stdio only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio only).
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child process (stdio only).
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL (streamable HTTP only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers (streamable HTTP only).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Disabled servers are skipped at startup.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Startup handshake timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-tool-call timeout in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_tool_timeout_secs() -> u64 {
    60
}

impl ServerConfig {
    /// Create a stdio server configuration.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            enabled: true,
            timeout_secs: default_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }

    /// Create a streamable HTTP server configuration.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::StreamableHttp,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
            enabled: true,
            timeout_secs: default_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }

    /// Add a command argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several command arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the startup handshake timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Override the per-tool-call timeout.
    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    /// Mark the server as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Source of server configurations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// List all enabled server configurations.
    ///
    /// An error here is fatal to subsystem startup; there is no way to
    /// know which servers should exist.
    async fn list_enabled(&self) -> McpResult<Vec<ServerConfig>>;

    /// Look up one server configuration by name, enabled or not.
    async fn get(&self, name: &str) -> McpResult<Option<ServerConfig>>;
}

/// In-memory configuration store.
///
/// Backs tests and embedders that assemble configurations in code. Also
/// loads a JSON file of server configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    servers: Vec<ServerConfig>,
}

impl StaticConfigStore {
    /// Create a store from a list of configurations.
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }

    /// Load server configurations from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> McpResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let servers: Vec<ServerConfig> = serde_json::from_str(&contents)
            .map_err(|e| McpError::Config(format!("failed to parse {}: {e}", path.display())))?;
        Ok(Self { servers })
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn list_enabled(&self) -> McpResult<Vec<ServerConfig>> {
        Ok(self
            .servers
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> McpResult<Option<ServerConfig>> {
        Ok(self.servers.iter().find(|s| s.name == name).cloned())
    }
}
