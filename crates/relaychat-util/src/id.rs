//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in relaychat follow the pattern: `prefix_ulid`
//! For example: `call_01HQXYZ...` for tool invocations.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    /// A tool invocation.
    Call,
    /// A running tool-server instance.
    Server,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Call => "call",
            IdPrefix::Server => "srv",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(IdPrefix::Call),
            "srv" => Some(IdPrefix::Server),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let (prefix, rest) = id.split_once('_')?;
        let prefix = IdPrefix::parse(prefix)?;
        let ulid = Ulid::from_string(&rest.to_uppercase()).ok()?;
        Some((prefix, ulid))
    }

    /// Check if an identifier has the expected prefix.
    pub fn has_prefix(id: &str, prefix: IdPrefix) -> bool {
        id.starts_with(prefix.as_str()) && id.chars().nth(prefix.as_str().len()) == Some('_')
    }

    /// Generate a tool-call ID (ascending for chronological order).
    pub fn call() -> String {
        Self::ascending(IdPrefix::Call)
    }

    /// Generate a server-instance ID (ascending).
    pub fn server() -> String {
        Self::ascending(IdPrefix::Server)
    }
}
