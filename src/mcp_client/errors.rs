//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed or timed out.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// Writing to the server's stdin failed (pipe closed, process exited).
    #[error("transport write error for server '{server}': {reason}")]
    TransportWrite { server: String, reason: String },

    /// Reading from the peer failed at the I/O level.
    #[error("transport read error for server '{server}': {reason}")]
    TransportRead { server: String, reason: String },

    /// A line from the server was not valid JSON, or violated the protocol.
    #[error("transport parse error for server '{server}': {reason}")]
    TransportParse { server: String, reason: String },

    /// The server closed its stdout while a request was outstanding.
    #[error("server '{server}' closed the connection{}", stderr_suffix(.stderr))]
    ConnectionClosed { server: String, stderr: String },

    /// Server returned a JSON-RPC error response.
    #[error("server '{server}' rejected '{method}': {}", rpc_display(.code, .message))]
    Rpc {
        server: String,
        method: String,
        code: Option<i64>,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A well-formed response whose result did not have the expected shape.
    #[error("invalid '{method}' result from server '{server}': {reason}")]
    InvalidResult {
        server: String,
        method: String,
        reason: String,
    },

    /// A request did not get a response in time.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// An operation was attempted outside the `Ready` state.
    #[error("server '{server}' is not ready (state: {state})")]
    NotReady { server: String, state: String },

    /// No session with that name is managed.
    #[error("unknown MCP server: '{name}'")]
    UnknownServer { name: String },

    /// A fully-qualified tool name lacked the `__` separator.
    #[error("invalid tool name format: '{name}'")]
    InvalidToolName { name: String },

    /// Configuration error (duplicate names, empty command).
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl McpError {
    /// Whether this failure closed the owning session.
    ///
    /// Protocol-level errors and timeouts leave the session usable; transport
    /// failures do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::InitFailed { .. }
                | McpError::TransportWrite { .. }
                | McpError::TransportRead { .. }
                | McpError::TransportParse { .. }
                | McpError::ConnectionClosed { .. }
        )
    }

    /// Name the tool in a `tools/call` failure so callers can tell calls apart.
    pub fn for_tool(self, tool: &str) -> Self {
        match self {
            McpError::Rpc {
                server,
                method,
                code,
                message,
                data,
            } => McpError::Rpc {
                server,
                method: format!("{method} {tool}"),
                code,
                message,
                data,
            },
            McpError::Timeout {
                server,
                method,
                timeout_ms,
            } => McpError::Timeout {
                server,
                method: format!("{method} {tool}"),
                timeout_ms,
            },
            other => other,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

fn rpc_display(code: &Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("MCP error [{code}]: {message}"),
        None => format!("MCP error: {message}"),
    }
}
