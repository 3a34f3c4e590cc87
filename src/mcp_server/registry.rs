//! Server-side tool registry — declared schemas plus their handlers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;

use super::handler::ToolHandler;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::types::{CallToolResult, ToolDescriptor};

/// Tools a server offers, in declaration order.
#[derive(Default)]
pub struct ToolRegistry {
    /// Returned verbatim on `tools/list`.
    tools: Vec<ToolDescriptor>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a tool and the handler behind it.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), McpError> {
        if self.handlers.contains_key(&descriptor.name) {
            return Err(McpError::Config {
                reason: format!("tool '{}' registered twice", descriptor.name),
            });
        }
        self.handlers
            .insert(descriptor.name.clone(), Arc::new(handler));
        self.tools.push(descriptor);
        Ok(())
    }

    /// Declared tools, in registration order.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the named tool.
    ///
    /// Unknown tools and handler failures, panics included, come back as
    /// successful results whose text explains the problem, flagged with
    /// `isError`.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> CallToolResult {
        let Some(handler) = self.handlers.get(name).cloned() else {
            tracing::warn!(tool = %name, "call to unknown tool");
            return CallToolResult::error_text(format!(
                "Unknown tool: {name}. Available tools: [{}]",
                self.available_list()
            ));
        };

        let start = Instant::now();
        let outcome = AssertUnwindSafe(handler.invoke(arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))));

        match outcome {
            Ok(text) => {
                tracing::info!(
                    tool = %name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "tool executed"
                );
                CallToolResult::text(text)
            }
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool failed");
                CallToolResult::error_text(format!("Error executing tool {name}: {e:#}"))
            }
        }
    }

    fn available_list(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("'{}'", t.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
