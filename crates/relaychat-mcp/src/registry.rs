//! Capability registry.
//!
//! Tracks which tools each running server advertises. Only running
//! servers have entries; the lifecycle manager registers a server after
//! a successful handshake and unregisters it when the server stops or
//! fails. Iteration order is server registration order, then tool name,
//! so the toolset presented to a session is deterministic.

use crate::protocol::McpTool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool advertised by a running server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Name of the server that provides the tool.
    pub server: String,
}

/// Registry of capabilities keyed by server name.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    // Vec rather than a map to preserve registration order.
    entries: Vec<(String, Vec<Capability>)>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server's tools, replacing any previous entry in place.
    pub fn register(&mut self, server: &str, tools: &[McpTool]) {
        let mut capabilities: Vec<Capability> = tools
            .iter()
            .map(|tool| Capability {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
                server: server.to_string(),
            })
            .collect();
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));

        match self.entries.iter_mut().find(|(name, _)| name == server) {
            Some((_, existing)) => *existing = capabilities,
            None => self.entries.push((server.to_string(), capabilities)),
        }
    }

    /// Remove a server's entry. Returns true if one existed.
    pub fn unregister(&mut self, server: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(name, _)| name != server);
        self.entries.len() != before
    }

    /// Tools advertised by one server.
    pub fn get(&self, server: &str) -> Option<&[Capability]> {
        self.entries
            .iter()
            .find(|(name, _)| name == server)
            .map(|(_, tools)| tools.as_slice())
    }

    /// All capabilities, in registration order then tool name.
    pub fn all(&self) -> Vec<Capability> {
        self.entries
            .iter()
            .flat_map(|(_, tools)| tools.iter().cloned())
            .collect()
    }

    /// Find the first server advertising a tool with this name.
    pub fn find(&self, tool: &str) -> Option<&Capability> {
        self.entries
            .iter()
            .flat_map(|(_, tools)| tools.iter())
            .find(|capability| capability.name == tool)
    }

    /// Number of registered servers.
    pub fn server_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of capabilities.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, tools)| tools.len()).sum()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
