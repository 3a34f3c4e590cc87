//! Tool backend seam between the agent and whatever executes tools.

use async_trait::async_trait;

use crate::inference::types::ToolSchema;
use crate::mcp_client::errors::McpError;
use crate::mcp_client::manager::SessionManager;
use crate::mcp_client::types::QualifiedTool;

/// A catalog of tools addressed by full name.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Schemas advertised to the model.
    fn tool_schemas(&self) -> Vec<ToolSchema>;

    /// Run one tool and return its text.
    async fn call_tool(
        &self,
        full_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError>;
}

/// Model-facing schema for a namespaced tool.
pub fn tool_schema(tool: &QualifiedTool) -> ToolSchema {
    ToolSchema {
        name: tool.full_name(),
        description: tool.tool.description.clone(),
        input_schema: tool.tool.input_schema.clone(),
    }
}

#[async_trait]
impl<T: ToolBackend + ?Sized> ToolBackend for &T {
    fn tool_schemas(&self) -> Vec<ToolSchema> {
        (**self).tool_schemas()
    }

    async fn call_tool(
        &self,
        full_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        (**self).call_tool(full_name, arguments).await
    }
}

#[async_trait]
impl ToolBackend for SessionManager {
    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.all_tools().iter().map(tool_schema).collect()
    }

    async fn call_tool(
        &self,
        full_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        self.call_tool_by_full_name(full_name, arguments).await
    }
}
