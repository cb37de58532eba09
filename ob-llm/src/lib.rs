//! BYO-key LLM chat client used by the prefilter and the answer generator.
//!
//! Single round-trip chat only; no streaming.

mod anthropic;
mod client;
mod error;
mod openai;
mod types;

pub use client::{LlmClient, Provider, validate_tool_name_all_providers};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
