//! Inference Client — Anthropic Messages API client for the agent loop.
//!
//! This module handles all communication with the model endpoint:
//! - Conversation and tool-schema types in the Messages API shape
//! - The [`ModelClient`] seam the agent is written against
//! - An HTTP implementation with structured error mapping
//! - Model configuration (`model:` section of the hub config)

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{AnthropicClient, ModelClient};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{
    ContentBlock, Message, MessageContent, ModelResponse, Role, StopReason, ToolSchema,
};
