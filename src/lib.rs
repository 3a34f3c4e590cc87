//! toolbridge — MCP stdio tool servers, a multi-server session manager, and
//! a tool-use agent loop.
//!
//! - [`mcp_client`]: spawn tool servers, handshake, correlate JSON-RPC over
//!   newline-delimited stdio, aggregate tools as `server__tool`.
//! - [`mcp_server`]: declare tools and serve them over the same transport.
//! - [`agent`]: drive a model through tool calls to a final answer.
//! - [`inference`]: the model client seam and its HTTP implementation.
//! - [`config`] / [`logging`]: the ambient pieces the binaries share.

pub mod agent;
pub mod config;
pub mod inference;
pub mod logging;
pub mod mcp_client;
pub mod mcp_server;

pub use agent::{Agent, AgentError, AgentOptions, ToolBackend};
pub use config::{ConfigError, ConfigLoader, HubConfig};
pub use mcp_client::{McpError, McpSession, ServerConfig, SessionManager, SessionState};
pub use mcp_server::{McpServer, ToolRegistry};
