//! MCP server loop over a line transport.
//!
//! Reads one JSON-RPC message per line, answers requests in arrival order,
//! and returns once the client closes its end. Stdout carries protocol
//! traffic only; diagnostics go through `tracing` to stderr.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use super::registry::ToolRegistry;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::transport::LineTransport;
use crate::mcp_client::types::{
    error_codes, Implementation, JsonRpcMessage, JsonRpcResponse, PROTOCOL_VERSION,
};

/// A tool server: identity plus a [`ToolRegistry`].
pub struct McpServer {
    info: Implementation,
    registry: ToolRegistry,
    initialized: AtomicBool,
}

impl McpServer {
    pub fn new(name: &str, version: &str, registry: ToolRegistry) -> Self {
        Self {
            info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            registry,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Serve on the process's own stdin/stdout until stdin closes.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve on an arbitrary reader/writer pair until the reader hits EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), McpError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let transport = LineTransport::new("client", reader, writer);
        tracing::info!(
            server = %self.info.name,
            tools = self.registry.len(),
            "MCP server listening"
        );

        loop {
            let reply = match transport.read_message().await {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => break,
                Err(McpError::TransportParse { reason, .. }) => {
                    tracing::warn!(server = %self.info.name, %reason, "unparseable line");
                    Some(JsonRpcResponse::failure(
                        Value::Null,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {reason}"),
                    ))
                }
                Err(e) => return Err(e),
            };

            if let Some(reply) = reply {
                transport.write_message(&reply).await?;
            }
        }

        tracing::info!(server = %self.info.name, "client closed stdin, shutting down");
        transport.close_writer().await;
        Ok(())
    }

    /// Handle one incoming message; `None` means nothing is sent back.
    pub async fn handle(&self, message: Value) -> Option<JsonRpcResponse> {
        let message: JsonRpcMessage = match serde_json::from_value(message.clone()) {
            Ok(m) => m,
            Err(e) => {
                // Responses to requests we never send are dropped.
                if message.get("result").is_some() || message.get("error").is_some() {
                    return None;
                }
                let id = message.get("id").cloned().unwrap_or(Value::Null);
                return Some(JsonRpcResponse::failure(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };

        let Some(id) = message.id.clone() else {
            self.handle_notification(&message.method);
            return None;
        };

        tracing::debug!(server = %self.info.name, method = %message.method, %id, "request");
        let outcome = self
            .handle_method(&message.method, message.params.unwrap_or(Value::Null))
            .await;

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, msg)) => JsonRpcResponse::failure(id, code, msg),
        })
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => {
                tracing::debug!(server = %self.info.name, "client initialized");
            }
            other => {
                tracing::debug!(server = %self.info.name, method = %other, "ignoring notification");
            }
        }
    }

    async fn handle_method(&self, method: &str, params: Value) -> Result<Value, (i64, String)> {
        match method {
            "initialize" => {
                self.initialized.store(true, Ordering::SeqCst);
                if let Some(client) = params.get("clientInfo") {
                    tracing::info!(server = %self.info.name, client = %client, "initialize");
                }
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": self.info,
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => {
                self.ensure_initialized()?;
                Ok(json!({ "tools": self.registry.tools() }))
            }
            "tools/call" => {
                self.ensure_initialized()?;
                let name = params
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or((error_codes::INVALID_PARAMS, "Missing tool name".to_string()))?;
                let arguments = params
                    .get("arguments")
                    .filter(|a| !a.is_null())
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let result = self.registry.dispatch(name, arguments).await;
                serde_json::to_value(result)
                    .map_err(|e| (error_codes::INTERNAL_ERROR, format!("Internal error: {e}")))
            }
            other => Err((
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn ensure_initialized(&self) -> Result<(), (i64, String)> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err((
                error_codes::SERVER_NOT_INITIALIZED,
                "Server not initialized".to_string(),
            ))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
