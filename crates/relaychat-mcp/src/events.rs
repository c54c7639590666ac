//! Lifecycle events.
//!
//! The lifecycle manager broadcasts an event whenever a server changes
//! state. Subscribers that fall behind lose the oldest events; these are
//! notifications, not a durable log.

use serde::Serialize;

/// Capacity of the broadcast channel carrying lifecycle events.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A server lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpEvent {
    /// A server completed its handshake and its tools are registered.
    ServerStarted { name: String, tool_count: usize },
    /// A server failed during startup or lost its connection.
    ServerFailed { name: String, error: String },
    /// A server was stopped deliberately.
    ServerStopped { name: String },
}

impl McpEvent {
    /// The name of the server the event concerns.
    pub fn server_name(&self) -> &str {
        match self {
            Self::ServerStarted { name, .. }
            | Self::ServerFailed { name, .. }
            | Self::ServerStopped { name } => name,
        }
    }
}
