//! Agent — a tool-use loop between a model and an MCP tool catalog.
//!
//! The agent owns its conversation history. It talks to the model through
//! [`ModelClient`](crate::inference::ModelClient) and to tools through
//! [`ToolBackend`], which the session manager implements.

pub mod agent_loop;
pub mod backend;
pub mod conversation;
pub mod errors;

pub use agent_loop::{Agent, AgentOptions, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_TOOL_TIMEOUT};
pub use backend::{tool_schema, ToolBackend};
pub use conversation::Conversation;
pub use errors::AgentError;
