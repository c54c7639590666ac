//! MCP error types.

use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Connection-level failure: refused, closed, or broken pipe.
    #[error("transport error: {0}")]
    Transport(String),

    /// A connect, handshake, or invocation deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// Malformed or missing capability advertisement during startup.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Malformed tool response or server-side tool error.
    #[error("invocation failed: {0}")]
    Invocation(String),

    /// No running server advertises the requested tool.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Server exists but is not in the running state.
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    /// No server with this name is known.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Configuration store failure. Fatal to subsystem initialization.
    #[error("config error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl McpError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }

    /// Create an invocation error.
    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation(message.into())
    }

    /// Whether this error means the underlying connection is dead.
    ///
    /// A timeout is not fatal to the connection; the server may just be slow.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Io(_) | Self::Http(_)
        )
    }
}
