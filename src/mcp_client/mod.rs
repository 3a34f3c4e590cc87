//! MCP Client — JSON-RPC over stdio transport for MCP server management.
//!
//! This module handles:
//! - Spawning tool servers as child processes and the capability handshake
//! - Newline-delimited JSON-RPC 2.0 framing over process stdio
//! - Request/response correlation, timeouts and crash detection per session
//! - Aggregating several servers behind one `server__tool` catalog
//!
//! The wire types in [`types`] are shared with [`crate::mcp_server`].

pub mod errors;
pub mod manager;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use manager::{split_full_name, SessionManager};
pub use session::{McpSession, SessionState};
pub use transport::LineTransport;
pub use types::{QualifiedTool, ServerConfig, ToolDescriptor};
