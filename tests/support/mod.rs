//! Shared helpers for tests that spawn the `demo-server` binary.

#![allow(dead_code)]

use toolbridge::mcp_client::ServerConfig;

/// Path to the compiled demo server.
pub const DEMO_SERVER: &str = env!("CARGO_BIN_EXE_demo-server");

/// Tools the demo server declares, in declaration order.
pub const DEMO_TOOLS: [&str; 6] = ["echo", "reverse", "get_env", "sleep", "fail", "crash"];

/// A config that launches the demo server under `name`.
pub fn demo_config(name: &str) -> ServerConfig {
    ServerConfig::new(name, [DEMO_SERVER])
}
