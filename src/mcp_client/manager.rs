//! Session manager — several tool servers behind one namespaced catalog.
//!
//! Every tool is exposed as `server__tool`. Startup is all-or-nothing: either
//! every configured server reaches `Ready` with its tool list cached, or every
//! session that did start is stopped again and the first failure is returned.

use std::collections::HashSet;
use std::time::Instant;

use futures::future::BoxFuture;

use super::errors::McpError;
use super::session::McpSession;
use super::types::{QualifiedTool, ServerConfig, ToolDescriptor, FULL_NAME_SEPARATOR};

/// A ready session and the tools it declared at startup.
struct ManagedSession {
    session: McpSession,
    tools: Vec<ToolDescriptor>,
}

// ─── SessionManager ──────────────────────────────────────────────────────────

/// Owns one [`McpSession`] per configured server.
pub struct SessionManager {
    configs: Vec<ServerConfig>,
    /// Config order; empty until `start_all` succeeds.
    sessions: Vec<ManagedSession>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("servers", &self.server_names())
            .field("running", &self.sessions.len())
            .finish()
    }
}

impl SessionManager {
    /// Validate `configs` and create an idle manager.
    ///
    /// Server names must be non-empty, unique and free of `__`, or the
    /// qualified tool names would be ambiguous.
    pub fn new(configs: Vec<ServerConfig>) -> Result<Self, McpError> {
        let mut seen = HashSet::new();
        for config in &configs {
            if config.name.is_empty() {
                return Err(McpError::Config {
                    reason: "server name must not be empty".into(),
                });
            }
            if config.name.contains(FULL_NAME_SEPARATOR) {
                return Err(McpError::Config {
                    reason: format!(
                        "server name '{}' must not contain '{FULL_NAME_SEPARATOR}'",
                        config.name
                    ),
                });
            }
            if !seen.insert(config.name.as_str()) {
                return Err(McpError::Config {
                    reason: format!("duplicate server name '{}'", config.name),
                });
            }
            if config.command.is_empty() {
                return Err(McpError::Config {
                    reason: format!("server '{}' has an empty command", config.name),
                });
            }
        }

        Ok(Self {
            configs,
            sessions: Vec::new(),
        })
    }

    /// Start a manager, run `f` against it, and stop every session afterwards.
    ///
    /// Sessions are stopped whether `f` succeeds or not. If the returned
    /// future is dropped early, the children are killed on drop.
    pub async fn scoped<T, F>(configs: Vec<ServerConfig>, f: F) -> Result<T, McpError>
    where
        F: for<'a> FnOnce(&'a SessionManager) -> BoxFuture<'a, T>,
    {
        let mut manager = SessionManager::new(configs)?;
        manager.start_all().await?;
        let output = f(&manager).await;
        manager.stop_all().await;
        Ok(output)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start every configured server concurrently and cache its tool list.
    pub async fn start_all(&mut self) -> Result<(), McpError> {
        if !self.sessions.is_empty() {
            return Err(McpError::Config {
                reason: "sessions already started".into(),
            });
        }

        let started = Instant::now();

        let handles: Vec<_> = self
            .configs
            .iter()
            .cloned()
            .map(|config| {
                let name = config.name.clone();
                (name, tokio::spawn(start_session(config)))
            })
            .collect();

        let mut ready = Vec::with_capacity(handles.len());
        let mut first_error: Option<McpError> = None;

        for (name, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(McpError::SpawnFailed {
                    name: name.clone(),
                    reason: format!("join error: {e}"),
                })
            });
            match outcome {
                Ok(managed) => ready.push(managed),
                Err(e) => {
                    tracing::error!(server = %name, error = %e, "failed to start MCP server");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(err) = first_error {
            for managed in &mut ready {
                managed.session.stop().await;
            }
            return Err(err);
        }

        self.sessions = ready;
        tracing::info!(
            servers = self.sessions.len(),
            tools = self.tool_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "all MCP servers ready"
        );
        Ok(())
    }

    /// Stop every session, leaving the manager empty.
    pub async fn stop_all(&mut self) {
        for mut managed in self.sessions.drain(..) {
            managed.session.stop().await;
        }
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// Every tool, in config order then declaration order.
    pub fn all_tools(&self) -> Vec<QualifiedTool> {
        self.sessions
            .iter()
            .flat_map(|managed| {
                managed.tools.iter().map(|tool| QualifiedTool {
                    server_name: managed.session.name().to_string(),
                    tool: tool.clone(),
                })
            })
            .collect()
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Call `tool` on the server named `server`.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let managed = self
            .sessions
            .iter()
            .find(|m| m.session.name() == server)
            .ok_or_else(|| McpError::UnknownServer {
                name: server.to_string(),
            })?;

        let start = Instant::now();
        let result = managed.session.call_tool(tool, arguments).await;
        tracing::info!(
            server = %server,
            tool = %tool,
            ok = result.is_ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool call"
        );
        result
    }

    /// Call a tool by its `server__tool` name.
    pub async fn call_tool_by_full_name(
        &self,
        full_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let (server, tool) = split_full_name(full_name)?;
        self.call_tool(server, tool, arguments).await
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Configured server names, in config order.
    pub fn server_names(&self) -> Vec<String> {
        self.configs.iter().map(|c| c.name.clone()).collect()
    }

    /// Number of tools across all running servers.
    pub fn tool_count(&self) -> usize {
        self.sessions.iter().map(|m| m.tools.len()).sum()
    }

    /// Whether `name` has a running session.
    pub fn is_running(&self, name: &str) -> bool {
        self.sessions.iter().any(|m| m.session.name() == name)
    }
}

/// Start one session and fetch its tools, stopping it again on failure.
async fn start_session(config: ServerConfig) -> Result<ManagedSession, McpError> {
    let mut session = McpSession::new(config);
    session.start().await?;

    match session.list_tools().await {
        Ok(tools) => {
            tracing::info!(server = %session.name(), tools = tools.len(), "discovered tools");
            Ok(ManagedSession { session, tools })
        }
        Err(e) => {
            session.stop().await;
            Err(e)
        }
    }
}

/// Split `server__tool` on the first separator.
pub fn split_full_name(full_name: &str) -> Result<(&str, &str), McpError> {
    full_name
        .split_once(FULL_NAME_SEPARATOR)
        .ok_or_else(|| McpError::InvalidToolName {
            name: full_name.to_string(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ServerConfig {
        ServerConfig::new(name, ["demo-server"])
    }

    #[test]
    fn test_split_full_name_first_separator() {
        assert_eq!(split_full_name("demo__echo").unwrap(), ("demo", "echo"));
        assert_eq!(
            split_full_name("repos__list__all").unwrap(),
            ("repos", "list__all")
        );
        assert!(matches!(
            split_full_name("echo"),
            Err(McpError::InvalidToolName { .. })
        ));
    }

    #[test]
    fn test_new_rejects_bad_names() {
        let dup = SessionManager::new(vec![config("a"), config("a")]);
        assert!(matches!(dup, Err(McpError::Config { .. })));

        let sep = SessionManager::new(vec![config("a__b")]);
        assert!(matches!(sep, Err(McpError::Config { .. })));

        let empty = SessionManager::new(vec![config("")]);
        assert!(matches!(empty, Err(McpError::Config { .. })));

        let no_cmd = SessionManager::new(vec![ServerConfig::new("a", Vec::<String>::new())]);
        assert!(matches!(no_cmd, Err(McpError::Config { .. })));
    }

    #[test]
    fn test_idle_manager_status() {
        let manager = SessionManager::new(vec![config("b"), config("a")]).unwrap();
        assert_eq!(manager.server_names(), vec!["b", "a"]);
        assert_eq!(manager.tool_count(), 0);
        assert!(!manager.is_running("a"));
        assert!(manager.all_tools().is_empty());
    }

    #[test]
    fn test_all_tools_config_then_declaration_order() {
        let mut manager = SessionManager::new(vec![config("a"), config("b")]).unwrap();
        manager.sessions = vec![
            ManagedSession {
                session: McpSession::new(config("a")),
                tools: vec![
                    ToolDescriptor::new("x", "", serde_json::json!({})),
                    ToolDescriptor::new("y", "", serde_json::json!({})),
                ],
            },
            ManagedSession {
                session: McpSession::new(config("b")),
                tools: vec![ToolDescriptor::new("x", "", serde_json::json!({}))],
            },
        ];

        let names: Vec<String> = manager.all_tools().iter().map(|t| t.full_name()).collect();
        assert_eq!(names, vec!["a__x", "a__y", "b__x"]);
        assert_eq!(manager.tool_count(), 3);
        assert!(manager.is_running("b"));
    }

    #[tokio::test]
    async fn test_call_unknown_server() {
        let manager = SessionManager::new(vec![config("demo")]).unwrap();
        let err = manager
            .call_tool_by_full_name("other__echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownServer { name } if name == "other"));
    }

    #[tokio::test]
    async fn test_call_without_separator_does_no_io() {
        let manager = SessionManager::new(vec![config("demo")]).unwrap();
        let err = manager
            .call_tool_by_full_name("echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidToolName { .. }));
    }

    #[tokio::test]
    async fn test_start_all_fails_whole_when_one_spawn_fails() {
        let mut manager = SessionManager::new(vec![ServerConfig::new(
            "ghost",
            ["toolbridge-definitely-missing-binary-7f3a"],
        )])
        .unwrap();
        let err = manager.start_all().await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(!manager.is_running("ghost"));
    }
}
