//! Agent loop — drive the model until it stops asking for tools.
//!
//! One turn: append the user message, call the model with the full history
//! and the tool catalog, and while the model stops for `tool_use`, run every
//! requested tool (concurrently, results kept in request order), append the
//! exchange, and call the model again. The final text is appended and
//! returned. If the turn fails, history is rolled back to where it started.

use std::time::{Duration, Instant};

use futures::future::join_all;

use super::backend::ToolBackend;
use super::conversation::Conversation;
use super::errors::AgentError;
use crate::inference::client::ModelClient;
use crate::inference::types::{ContentBlock, Message};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default bound on a single tool call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on model ↔ tool round trips per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// Tool results longer than this are truncated before reaching the model.
pub const MAX_TOOL_RESULT_CHARS: usize = 6000;

/// Tunables for [`Agent`].
#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    pub tool_timeout: Duration,
    pub max_tool_rounds: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// A conversation with a model that can call tools.
pub struct Agent<M, B> {
    model: M,
    tools: B,
    conversation: Conversation,
    options: AgentOptions,
}

impl<M: ModelClient, B: ToolBackend> Agent<M, B> {
    pub fn new(model: M, tools: B) -> Self {
        Self::with_options(model, tools, AgentOptions::default())
    }

    pub fn with_options(model: M, tools: B, options: AgentOptions) -> Self {
        Self {
            model,
            tools,
            conversation: Conversation::new(),
            options,
        }
    }

    /// Messages so far, oldest first.
    pub fn history(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Forget the conversation.
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    pub fn tools(&self) -> &B {
        &self.tools
    }

    /// Run one user turn to a final answer.
    pub async fn run_turn(&mut self, user_input: &str) -> Result<String, AgentError> {
        let checkpoint = self.conversation.len();
        let start = Instant::now();

        match self.drive(user_input).await {
            Ok((answer, rounds)) => {
                tracing::info!(
                    conversation = %self.conversation.id(),
                    rounds,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "turn complete"
                );
                Ok(answer)
            }
            Err(e) => {
                self.conversation.truncate(checkpoint);
                tracing::warn!(
                    conversation = %self.conversation.id(),
                    error = %e,
                    "turn failed, history rolled back"
                );
                Err(e)
            }
        }
    }

    async fn drive(&mut self, user_input: &str) -> Result<(String, usize), AgentError> {
        self.conversation.push(Message::user_text(user_input));
        let schemas = self.tools.tool_schemas();

        let mut response = self
            .model
            .create_message(self.conversation.messages(), &schemas)
            .await?;
        let mut rounds = 0;

        while response.wants_tools() {
            let calls: Vec<(String, String, serde_json::Value)> = response
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if calls.is_empty() {
                break;
            }

            rounds += 1;
            if rounds > self.options.max_tool_rounds {
                return Err(AgentError::TooManyToolRounds {
                    max_rounds: self.options.max_tool_rounds,
                });
            }

            let outputs = join_all(
                calls
                    .iter()
                    .map(|(_, name, input)| self.execute_tool(name, input.clone())),
            )
            .await;

            let results = calls
                .into_iter()
                .zip(outputs)
                .map(|((id, _, _), content)| ContentBlock::ToolResult {
                    tool_use_id: id,
                    content,
                })
                .collect();

            let assistant_blocks = response
                .content
                .into_iter()
                .filter(|b| !matches!(b, ContentBlock::Unknown))
                .collect();
            self.conversation
                .push(Message::assistant_blocks(assistant_blocks));
            self.conversation.push(Message::tool_results(results));

            response = self
                .model
                .create_message(self.conversation.messages(), &schemas)
                .await?;
        }

        let answer = response.text();
        self.conversation.push(Message::assistant_text(answer.clone()));
        Ok((answer, rounds))
    }

    /// Run one tool; every failure becomes `Error: ...` text.
    async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> String {
        let start = Instant::now();
        let outcome =
            tokio::time::timeout(self.options.tool_timeout, self.tools.call_tool(name, arguments))
                .await;

        match outcome {
            Ok(Ok(text)) => {
                tracing::debug!(
                    tool = %name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "tool call succeeded"
                );
                truncate_tool_result(&text, name)
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                format!("Error: {e}")
            }
            Err(_) => {
                tracing::warn!(tool = %name, "tool call timed out");
                format!(
                    "Error: tool call '{name}' timed out after {}",
                    format_duration(self.options.tool_timeout)
                )
            }
        }
    }
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Cap a tool result at `MAX_TOOL_RESULT_CHARS`, cut on a char boundary.
fn truncate_tool_result(result: &str, tool_name: &str) -> String {
    let total = result.chars().count();
    if total <= MAX_TOOL_RESULT_CHARS {
        return result.to_string();
    }

    let kept: String = result.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    tracing::warn!(
        tool = %tool_name,
        original_chars = total,
        truncated_to = MAX_TOOL_RESULT_CHARS,
        "tool result truncated"
    );
    format!("{kept}\n\n[... truncated: showing first {MAX_TOOL_RESULT_CHARS} of {total} chars]")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
