use crate::error::{LlmError, Result};
use crate::model::{ChatModel, TokenSink};
use crate::openai::{DEFAULT_BASE_URL, OpenAiClient};
use crate::types::{ChatMessage, ChatResponse, StreamChunk, ToolCall, ToolDefinition, Usage};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;

/// BYO-key client for any OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    inner: OpenAiClient,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        let base_url = base_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_BASE_URL);
        Self {
            inner: OpenAiClient::new(http, api_key, base_url),
        }
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    #[tracing::instrument(level = "info", skip_all, fields(model = %model, messages = messages.len(), tools = tools.len()))]
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        self.inner.chat(model, messages, tools).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %model, messages = messages.len(), tools = tools.len()))]
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: &TokenSink,
    ) -> Result<ChatResponse> {
        let mut stream = self.inner.chat_stream(model, messages, tools).await?;
        let mut assembled = StreamAssembler::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let StreamChunk::Delta { content } = &chunk {
                // A dropped receiver only means nobody is watching.
                let _ = sink.send(content.clone());
            }
            assembled.push(chunk);
        }

        match assembled.finish() {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!(error = %e, "streamed tool call arguments invalid; retrying without streaming");
                self.complete(model, messages, tools).await
            }
        }
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream chunks back into one assistant message.
#[derive(Debug, Default)]
pub(crate) struct StreamAssembler {
    content: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    usage: Usage,
    finish_reason: Option<String>,
}

impl StreamAssembler {
    pub(crate) fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Delta { content } => self.content.push_str(&content),
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = id.filter(|id| !id.is_empty()) {
                    entry.id = id;
                }
                if let Some(name) = name {
                    entry.name.push_str(&name);
                }
                entry.arguments.push_str(&arguments);
            }
            StreamChunk::Done {
                usage,
                finish_reason,
            } => {
                if usage != Usage::default() {
                    self.usage = usage;
                }
                if finish_reason.is_some() {
                    self.finish_reason = finish_reason;
                }
            }
        }
    }

    /// Fails when any assembled call is unusable, so the caller can fall back.
    pub(crate) fn finish(self) -> Result<ChatResponse> {
        let mut calls = Vec::with_capacity(self.tool_calls.len());
        for (index, partial) in self.tool_calls {
            if partial.id.is_empty() || partial.name.is_empty() {
                return Err(LlmError::StreamParse(format!(
                    "tool call {index} missing id or name"
                )));
            }
            let arguments = if partial.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                partial.arguments
            };
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&arguments) {
                return Err(LlmError::StreamParse(format!(
                    "tool call {} arguments are not JSON: {e}",
                    partial.name
                )));
            }
            calls.push(ToolCall {
                id: partial.id,
                name: partial.name,
                arguments,
            });
        }

        Ok(ChatResponse {
            message: ChatMessage::assistant_with_tool_calls(self.content, calls),
            usage: self.usage,
            finish_reason: self.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }
}

/// Chat-completions tool names must match `^[a-zA-Z0-9_-]{1,64}$`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1-64 characters: {name:?}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
