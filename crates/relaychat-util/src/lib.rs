//! Shared utilities for relaychat.
//!
//! This crate provides common utilities used across the relaychat workspace:
//! - ULID-based identifier generation
//! - Logging setup with tracing

pub mod id;
pub mod log;

pub use id::Identifier;
