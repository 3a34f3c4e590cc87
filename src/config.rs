//! Hub configuration loading and validation.
//!
//! Reads `toolbridge.yaml` and resolves environment variables. The loaded
//! value is owned by a [`ConfigLoader`]; nothing is cached globally, and a
//! fresh read happens only on an explicit [`ConfigLoader::reload`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent::{AgentOptions, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_TOOL_TIMEOUT};
use crate::inference::config::ModelConfig;
use crate::mcp_client::types::ServerConfig;

/// Config file searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "toolbridge.yaml";

/// Environment variable naming an explicit config path.
pub const CONFIG_PATH_ENV: &str = "TOOLBRIDGE_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while locating, reading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find toolbridge.yaml (set TOOLBRIDGE_CONFIG or run from a directory below it)")]
    NotFound,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },

    #[error("unknown server '{name}' (configured: {})", configured.join(", "))]
    UnknownServer {
        name: String,
        configured: Vec<String>,
    },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Agent loop tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl AgentSettings {
    pub fn options(&self) -> AgentOptions {
        AgentOptions {
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            max_tool_rounds: self.max_tool_rounds,
        }
    }
}

/// Top-level config file (mirrors `toolbridge.yaml`).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl HubConfig {
    /// Parse YAML text after env-var interpolation.
    pub fn from_yaml(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate_env_vars(raw);
        let mut config: HubConfig =
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        for server in &mut config.servers {
            if let Some(program) = server.command.first_mut() {
                *program = expand_tilde(program);
            }
            if let Some(cwd) = server.cwd.as_mut() {
                *cwd = expand_tilde(cwd);
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.servers {
            if server.command.is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("server '{}' has an empty command", server.name),
                });
            }
        }
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                reason: "agent.max_tool_rounds must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The configured servers whose names appear in `names`, in the order given.
    ///
    /// An empty selection means every server.
    pub fn servers_named(&self, names: &[String]) -> Result<Vec<ServerConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.servers.clone());
        }
        names
            .iter()
            .map(|name| {
                self.servers
                    .iter()
                    .find(|s| &s.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownServer {
                        name: name.clone(),
                        configured: self.servers.iter().map(|s| s.name.clone()).collect(),
                    })
            })
            .collect()
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Owns a config file path and the last value loaded from it.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    current: HubConfig,
}

impl ConfigLoader {
    /// Read and validate `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let current = read_config(&path)?;
        tracing::info!(path = %path.display(), servers = current.servers.len(), "config loaded");
        Ok(Self { path, current })
    }

    /// Locate the config with [`find_config_path`] and load it.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        Self::load(find_config_path(start)?)
    }

    pub fn get(&self) -> &HubConfig {
        &self.current
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file. On failure the previous value is kept.
    pub fn reload(&mut self) -> Result<&HubConfig, ConfigError> {
        self.current = read_config(&self.path)?;
        tracing::info!(path = %self.path.display(), "config reloaded");
        Ok(&self.current)
    }
}

fn read_config(path: &Path) -> Result<HubConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    HubConfig::from_yaml(&raw, &path.display().to_string())
}

/// Resolve the config path.
///
/// Checks `TOOLBRIDGE_CONFIG` first, then searches upward from `start` for
/// `toolbridge.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "TOOLBRIDGE_CONFIG points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
model:
  name: claude-test
  max_tokens: 1024
agent:
  tool_timeout_secs: 15
servers:
  - name: demo
    command: ["demo-server"]
    env:
      GREETING: "${TOOLBRIDGE_TEST_GREETING_UNSET_5d1:-friend}"
  - name: repos
    command: ["repo-server", "--readonly"]
"#;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        let out = interpolate_env_vars("a=${TOOLBRIDGE_TEST_UNSET_VAR_77:-fallback};");
        assert_eq!(out, "a=fallback;");
    }

    #[test]
    fn test_interpolate_env_vars_set() {
        std::env::set_var("TOOLBRIDGE_TEST_SET_VAR_41", "value");
        let out = interpolate_env_vars("x: ${TOOLBRIDGE_TEST_SET_VAR_41}");
        assert_eq!(out, "x: value");
    }

    #[test]
    fn test_interpolate_unset_without_default_is_empty() {
        assert_eq!(interpolate_env_vars("[${TOOLBRIDGE_TEST_UNSET_VAR_78}]"), "[]");
        assert_eq!(interpolate_env_vars("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/bin/tool"), format!("{}/bin/tool", home.display()));
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_from_yaml_full() {
        let cfg = HubConfig::from_yaml(SAMPLE, "inline").unwrap();
        assert_eq!(cfg.model.name, "claude-test");
        assert_eq!(cfg.model.max_tokens, 1024);
        assert_eq!(cfg.agent.tool_timeout_secs, 15);
        assert_eq!(cfg.agent.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(cfg.servers.len(), 2);
        assert_eq!(cfg.servers[0].env["GREETING"], "friend");
        assert_eq!(cfg.servers[1].command, vec!["repo-server", "--readonly"]);
    }

    #[test]
    fn test_from_yaml_rejects_empty_command() {
        let err = HubConfig::from_yaml("servers:\n  - name: x\n    command: []\n", "inline")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_servers_named_selection() {
        let cfg = HubConfig::from_yaml(SAMPLE, "inline").unwrap();
        let picked = cfg.servers_named(&["repos".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "repos");

        assert_eq!(cfg.servers_named(&[]).unwrap().len(), 2);

        let err = cfg.servers_named(&["jira".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown server 'jira' (configured: demo, repos)"
        );
    }

    #[test]
    fn test_loader_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();

        let mut loader = ConfigLoader::load(&path).unwrap();
        assert_eq!(loader.get().servers.len(), 2);

        std::fs::write(&path, "servers:\n  - name: only\n    command: [x]\n").unwrap();
        // Not re-read until asked.
        assert_eq!(loader.get().servers.len(), 2);

        let reloaded = loader.reload().unwrap();
        assert_eq!(reloaded.servers.len(), 1);
        assert_eq!(reloaded.servers[0].name, "only");
    }

    #[test]
    fn test_loader_reload_failure_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();
        let mut loader = ConfigLoader::load(&path).unwrap();

        std::fs::write(&path, "servers: [not: valid: yaml").unwrap();
        assert!(matches!(loader.reload(), Err(ConfigError::Parse { .. })));
        assert_eq!(loader.get().servers.len(), 2);
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "servers: []\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        if std::env::var(CONFIG_PATH_ENV).is_err() {
            let found = find_config_path(&nested).unwrap();
            assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigLoader::load("/definitely/not/here/toolbridge.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
