//! Interactive chat REPL backed by MCP tool servers.
//!
//! Reads `toolbridge.yaml` (see `TOOLBRIDGE_CONFIG`), starts every server,
//! or the comma-separated subset in `TOOLBRIDGE_SERVERS`, and runs one agent
//! turn per input line. `quit` exits, `tools` lists the catalog, `clear`
//! forgets the conversation.

use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolbridge::agent::{Agent, AgentError, AgentOptions};
use toolbridge::config::ConfigLoader;
use toolbridge::inference::AnthropicClient;
use toolbridge::logging::{data_dir, init_tracing, LogTarget};
use toolbridge::mcp_client::SessionManager;

/// Longest description shown by the `tools` command.
const TOOL_DESCRIPTION_PREVIEW: usize = 80;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_file = init_tracing(LogTarget::File(data_dir().join("logs")))?;

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let loader = ConfigLoader::discover(&cwd)?;
    let config = loader.get();

    let selection: Vec<String> = std::env::var("TOOLBRIDGE_SERVERS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let servers = config.servers_named(&selection)?;

    let client = AnthropicClient::from_config(config.model.clone())?;
    let options = config.agent.options();

    let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
    println!("Connecting to MCP servers: {}...", names.join(", "));
    if let Some(path) = &log_file {
        println!("Logs: {}", path.display());
    }

    SessionManager::scoped(servers, |manager| Box::pin(repl(manager, client, options))).await??;

    println!("Goodbye!");
    Ok(())
}

async fn repl(
    manager: &SessionManager,
    client: AnthropicClient,
    options: AgentOptions,
) -> anyhow::Result<()> {
    println!(
        "Connected: {} tools from {} servers (model: {}).",
        manager.tool_count(),
        manager.server_names().len(),
        client.model_name()
    );
    println!("Type your message, 'tools' to list tools, 'clear' to reset, or 'quit' to exit.");

    let mut agent = Agent::with_options(client, manager, options);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" => break,
            "tools" => {
                println!("\nAvailable tools:");
                for tool in manager.all_tools() {
                    println!("  {}", tool.full_name());
                    println!("    {}", preview(&tool.tool.description));
                }
                continue;
            }
            "clear" => {
                agent.clear();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        match agent.run_turn(input).await {
            Ok(answer) => println!("\nAssistant:\n{answer}"),
            Err(e) => {
                println!("\nError: {e}");
                if matches!(&e, AgentError::Model(inner) if inner.is_retryable()) {
                    println!("The model endpoint may be busy; send the message again to retry.");
                }
            }
        }
    }

    Ok(())
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TOOL_DESCRIPTION_PREVIEW {
        return text.to_string();
    }
    let cut: String = text.chars().take(TOOL_DESCRIPTION_PREVIEW).collect();
    format!("{cut}...")
}
