//! Provider adapters for the Loom agent.
//!
//! Translates a transcript plus tool definitions into one of four backend wire formats and
//! normalizes every backend's reply into a single `{text, tool_calls}` shape.

mod anthropic;
mod client;
mod error;
mod gemini;
mod openai;
mod types;

pub use client::{
    LlmClient, Provider, ProviderAdapter, ProviderConfig, normalize, validate_tool_name,
};
pub use error::{LlmError, Result};
pub use types::{
    ChatMessage, NormalizedResponse, RawResponse, Role, ToolArguments, ToolCall, ToolDefinition,
    Usage,
};
