//! MCP (Model Context Protocol) server lifecycle management.
//!
//! Manages a fleet of external tool servers on behalf of chat sessions:
//! starting them, running the MCP handshake, tracking the tools they
//! advertise, routing tool calls, and containing their failures.
//!
//! ```text
//!  ConfigStore ──> McpLifecycleManager ──> ServerHandle ──> Transport
//!                        │                                 (stdio/http)
//!                        v
//!               CapabilityRegistry <── McpGateway <── sessions
//! ```
//!
//! The [`McpLifecycleManager`] is the single writer for server state and
//! the capability registry; the [`McpGateway`] is the read-side surface
//! sessions call tools through. Servers come and go without affecting
//! each other or the host application.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handle;
pub mod http;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod stdio;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigStore, ServerConfig, StaticConfigStore, TransportKind};
pub use error::{McpError, McpResult};
pub use events::McpEvent;
pub use gateway::{McpGateway, ToolCall, ToolResult};
pub use handle::{ServerHandle, ServerState, ServerStatus};
pub use http::{HttpConfig, StreamableHttpTransport};
pub use lifecycle::McpLifecycleManager;
pub use protocol::{McpTool, ToolCallResult, ToolContent};
pub use registry::{Capability, CapabilityRegistry};
pub use stdio::{StdioConfig, StdioTransport};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
