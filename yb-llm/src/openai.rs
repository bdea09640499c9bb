use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, StreamChunk, ToolCall, ToolDefinition, Usage};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, req: &ChatCompletionRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %model))]
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let req = ChatCompletionRequest::new(model, messages, tools, false);
        let body = self.post(&req).await?.text().await?;
        let parsed: CompletionResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(model = %model))]
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChunkStream> {
        let req = ChatCompletionRequest::new(model, messages, tools, true);
        let response = self.post(&req).await?;
        let events = Box::pin(decode_sse(response.bytes_stream()));

        let chunks = events
            .map(|event| -> Vec<Result<StreamChunk>> {
                match event {
                    Ok(SseEvent::Data(data)) => parse_stream_data(&data),
                    Ok(SseEvent::Comment) => Vec::new(),
                    Err(e) => vec![Err(e)],
                }
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(chunks))
    }
}

/// Turns one SSE `data:` payload into zero or more chunks.
fn parse_stream_data(data: &str) -> Vec<Result<StreamChunk>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            return vec![Err(LlmError::StreamParse(format!(
                "chunk json error={e} data={data}"
            )))];
        }
    };

    let mut out = Vec::new();
    let mut finish_reason = None;
    if let Some(choice) = chunk.choices.into_iter().next() {
        finish_reason = choice.finish_reason;
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            out.push(Ok(StreamChunk::Delta { content }));
        }
        for call in choice.delta.tool_calls {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            out.push(Ok(StreamChunk::ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments,
            }));
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(Ok(StreamChunk::Done {
            usage: usage.into(),
            finish_reason,
        }));
    } else if finish_reason.is_some() {
        out.push(Ok(StreamChunk::Done {
            usage: Usage::default(),
            finish_reason,
        }));
    }
    out
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(model: &'a str, messages: &[ChatMessage], tools: &[ToolDefinition], stream: bool) -> Self {
        let tools: Vec<WireTool> = tools.iter().map(WireTool::from).collect();
        Self {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(t: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(m: &ChatMessage) -> Self {
        // Assistant tool-call messages may carry null content; every other role
        // must send a string, even an empty one.
        let content = if m.role == Role::Assistant && m.content.is_empty() {
            None
        } else {
            Some(m.content.clone())
        };
        Self {
            role: m.role.as_str(),
            content,
            tool_calls: m
                .tool_calls
                .iter()
                .map(|tc| WireToolCall {
                    id: tc.id.clone(),
                    r#type: "function",
                    function: WireFunctionCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<CompletionToolCall>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: String,
    #[serde(default)]
    function: CompletionFunction,
}

#[derive(Debug, Deserialize, Default)]
struct CompletionFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }
    }
}

impl TryFrom<CompletionResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: CompletionResponse) -> Result<Self> {
        let choice = v
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseFormat("response missing choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            message: ChatMessage::assistant_with_tool_calls(
                choice.message.content.unwrap_or_default(),
                tool_calls,
            ),
            usage: v.usage.unwrap_or_default().into(),
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug)]
enum SseEvent {
    Data(String),
    Comment,
}

fn decode_sse<S>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures_util::stream::unfold(
        (bytes_stream, String::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(event) = take_event(&mut buffer) {
                    return Some((Ok(event), (stream, buffer)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                    Some(Err(e)) => {
                        return Some((Err(LlmError::Http(e.to_string())), (stream, buffer)));
                    }
                    None => {
                        let rest = std::mem::take(&mut buffer);
                        if rest.trim().is_empty() {
                            return None;
                        }
                        return Some((Ok(event_from_block(&rest)), (stream, buffer)));
                    }
                }
            }
        },
    )
}

fn take_event(buffer: &mut String) -> Option<SseEvent> {
    let normalized_end = buffer.find("\n\n").map(|i| (i, 2));
    let crlf_end = buffer.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, sep) = match (normalized_end, crlf_end) {
        (Some(a), Some(b)) => std::cmp::min_by_key(a, b, |x| x.0),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let block = buffer[..idx].to_string();
    buffer.drain(..idx + sep);
    Some(event_from_block(&block))
}

fn event_from_block(block: &str) -> SseEvent {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        SseEvent::Comment
    } else {
        SseEvent::Data(data.join("\n"))
    }
}
