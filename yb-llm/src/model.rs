use crate::error::Result;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Receives incremental assistant text while a streaming completion runs.
pub type TokenSink = UnboundedSender<String>;

/// Completion capability the engine drives.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse>;

    /// Streaming variant. Every text fragment is forwarded to `sink` before the
    /// assembled message is returned. Implementations must never return a tool
    /// call whose arguments are not valid JSON; they fall back to `complete`.
    async fn complete_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        sink: &TokenSink,
    ) -> Result<ChatResponse> {
        let response = self.complete(model, messages, tools).await?;
        if !response.message.content.is_empty() {
            let _ = sink.send(response.message.content.clone());
        }
        Ok(response)
    }
}
