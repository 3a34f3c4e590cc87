//! Model endpoint configuration.
//!
//! Lives under the `model:` key of the hub config file. Only the name of the
//! API-key variable is stored; the key itself is read from the environment
//! when the client is built.

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

/// Default Messages API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Default API-key variable.
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Model runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model_name() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            max_tokens: default_max_tokens(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            system_prompt: None,
        }
    }
}

impl ModelConfig {
    /// Read the API key from the configured variable.
    pub fn api_key(&self) -> Result<String, InferenceError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(InferenceError::ConfigError {
                reason: format!("environment variable {} is not set", self.api_key_env),
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
