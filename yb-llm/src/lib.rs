//! LLM capability for yabot.
//!
//! Message types, the `ChatModel` seam the engine drives, and an
//! OpenAI-compatible chat-completions client with SSE streaming.

mod client;
mod error;
mod model;
mod openai;
mod types;

pub use client::{LlmClient, validate_tool_name};
pub use error::{LlmError, Result};
pub use model::{ChatModel, TokenSink};
pub use types::{ChatMessage, ChatResponse, Role, StreamChunk, ToolCall, ToolDefinition, Usage};
