//! Demo MCP tool server over stdio.
//!
//! Tools: `echo`, `reverse`, `get_env`, `sleep`, `fail`, `crash`. Logs go to
//! stderr; stdout carries protocol traffic only. Setting
//! `DEMO_SERVER_FAIL_STARTUP` makes the process exit before reading anything,
//! which is useful for exercising client startup failures.
//! `DEMO_SERVER_STDERR_NOISE` makes it write invalid UTF-8 to stderr at
//! startup and a large stderr burst on every `echo`.

use std::io::Write;
use std::time::Duration;

use serde_json::{json, Value};
use toolbridge::logging::{init_tracing, LogTarget};
use toolbridge::mcp_client::types::ToolDescriptor;
use toolbridge::mcp_server::{
    format_result, handler_fn, optional_bool, optional_u64, required_str, McpServer,
    ToolRegistry,
};

const NOISE_ENV: &str = "DEMO_SERVER_STDERR_NOISE";

fn text_schema(field: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { field: { "type": "string", "description": description } },
        "required": [field]
    })
}

fn build_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolDescriptor::new(
            "echo",
            "Return the given text, optionally upper-cased",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" },
                    "uppercase": { "type": "boolean", "default": false }
                },
                "required": ["text"]
            }),
        ),
        handler_fn(|args: Value| async move {
            let text = required_str(&args, "text")?;
            stderr_noise()?;
            Ok::<_, anyhow::Error>(if optional_bool(&args, "uppercase")?.unwrap_or(false) {
                text.to_uppercase()
            } else {
                text.to_string()
            })
        }),
    )?;

    registry.register(
        ToolDescriptor::new("reverse", "Reverse the given text", text_schema("text", "Text to reverse")),
        handler_fn(|args: Value| async move {
            Ok::<_, anyhow::Error>(required_str(&args, "text")?.chars().rev().collect::<String>())
        }),
    )?;

    registry.register(
        ToolDescriptor::new(
            "get_env",
            "Read an environment variable from the server process",
            text_schema("name", "Variable name"),
        ),
        handler_fn(|args: Value| async move {
            let name = required_str(&args, "name")?;
            std::env::var(name)
                .map_err(|_| anyhow::anyhow!("environment variable {name} is not set"))
        }),
    )?;

    registry.register(
        ToolDescriptor::new(
            "sleep",
            "Wait for the given number of milliseconds",
            json!({
                "type": "object",
                "properties": { "ms": { "type": "integer", "minimum": 0 } }
            }),
        ),
        handler_fn(|args: Value| async move {
            let ms = optional_u64(&args, "ms")?.unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, anyhow::Error>(format_result(&json!({ "slept_ms": ms })))
        }),
    )?;

    registry.register(
        ToolDescriptor::new(
            "fail",
            "Always fails with the given message",
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } }
            }),
        ),
        handler_fn(|args: Value| async move {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("requested failure")
                .to_string();
            Err::<String, _>(anyhow::anyhow!(message))
        }),
    )?;

    registry.register(
        ToolDescriptor::new(
            "crash",
            "Exit the server process without replying",
            json!({ "type": "object", "properties": {} }),
        ),
        handler_fn(|_args: Value| async move { crash() }),
    )?;

    Ok(registry)
}

/// With `DEMO_SERVER_STDERR_NOISE` set, write a burst of stderr output
/// much larger than a pipe buffer.
fn stderr_noise() -> std::io::Result<()> {
    if std::env::var_os(NOISE_ENV).is_none() {
        return Ok(());
    }
    let line = format!("{}\n", "noise ".repeat(16));
    let mut stderr = std::io::stderr().lock();
    for _ in 0..4096 {
        stderr.write_all(line.as_bytes())?;
    }
    stderr.flush()
}

/// Exit without writing a response, as a crashing server would.
fn crash() -> anyhow::Result<String> {
    eprintln!("demo-server: crashing on request");
    std::process::exit(3)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogTarget::Stderr)?;

    if std::env::var_os(NOISE_ENV).is_some() {
        std::io::stderr().write_all(b"\xff\xfe not utf-8\n")?;
    }

    if let Ok(reason) = std::env::var("DEMO_SERVER_FAIL_STARTUP") {
        eprintln!("demo-server: refusing to start: {reason}");
        std::process::exit(2);
    }

    let server = McpServer::new("demo-server", env!("CARGO_PKG_VERSION"), build_registry()?);
    server.run_stdio().await?;
    Ok(())
}
