//! MCP Server — expose named tool handlers over newline-delimited stdio.
//!
//! Declared schemas are returned verbatim from `tools/list`; `tools/call`
//! is dispatched by name. Handler failures and unknown tools come back as
//! readable text so the calling model can see what went wrong.

pub mod handler;
pub mod registry;
pub mod server;

pub use handler::{
    format_result, handler_fn, optional_bool, optional_u64, required_str, validate_required,
    FnHandler, ToolHandler,
};
pub use registry::ToolRegistry;
pub use server::McpServer;
