//! Tool catalog and dispatcher.
//!
//! Built-in engine tools (`ask_user`, the cross-agent meta tools) are a closed
//! set; I/O tools come from an open registry of [`Tool`] implementations and
//! skills from the [`SkillCatalog`]. All of them resolve through
//! [`ToolCatalog::kind`] so there is a single dispatch path.

use crate::engine::Runtime;
use crate::engine::error::{EngineError, Result};
use crate::engine::state::{AgentName, RoomState};
use crate::engine::trim::normalize_for_transport;
use crate::skills::{Skill, SkillCatalog};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use yb_llm::{ChatMessage, ToolCall, ToolDefinition};
use yb_tools::{ApprovalScope, ShellOutcome, Tool, to_llm_tool_def};

pub const ASK_USER: &str = "ask_user";
pub const DEFAULT_QUESTION: &str = "Can you clarify?";
pub const NO_OUTPUT: &str = "…(no output)";
const RECENT_DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaTool {
    Ask,
    SetModel,
    RecentToolCalls,
}

impl MetaTool {
    pub const ALL: [MetaTool; 3] = [MetaTool::Ask, MetaTool::SetModel, MetaTool::RecentToolCalls];

    pub fn name(self) -> &'static str {
        match self {
            MetaTool::Ask => "agent_ask",
            MetaTool::SetModel => "agent_set_model",
            MetaTool::RecentToolCalls => "agent_recent_tool_calls",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    fn definition(self) -> ToolDefinition {
        let agent = json!({ "type": "string", "enum": ["main", "meta"] });
        let (description, parameters) = match self {
            MetaTool::Ask => (
                "Ask another agent to respond to a user query.",
                json!({
                    "type": "object",
                    "properties": { "agent": agent, "text": { "type": "string" } },
                    "required": ["agent", "text"]
                }),
            ),
            MetaTool::SetModel => (
                "Change the active model for another agent.",
                json!({
                    "type": "object",
                    "properties": { "agent": agent, "model": { "type": "string" } },
                    "required": ["agent", "model"]
                }),
            ),
            MetaTool::RecentToolCalls => (
                "List recent tool calls made by another agent.",
                json!({
                    "type": "object",
                    "properties": {
                        "agent": agent,
                        "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
                    },
                    "required": ["agent"]
                }),
            ),
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

fn ask_user_definition() -> ToolDefinition {
    ToolDefinition {
        name: ASK_USER.to_string(),
        description: "Ask the user a clarifying question and wait for the reply.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        }),
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    approval: ApprovalScope,
    definition: ToolDefinition,
}

pub enum ToolKind<'a> {
    AskUser,
    Meta(MetaTool),
    Skill(&'a Skill),
    Registered(&'a Arc<dyn Tool>),
}

pub struct ToolCatalog {
    registry: BTreeMap<String, RegisteredTool>,
    skills: SkillCatalog,
}

impl ToolCatalog {
    pub fn new(tools: Vec<Arc<dyn Tool>>, skills: SkillCatalog) -> Self {
        let registry = tools
            .into_iter()
            .map(|tool| {
                let spec = tool.spec();
                let definition = to_llm_tool_def(tool.as_ref());
                (
                    spec.name,
                    RegisteredTool {
                        approval: spec.approval,
                        definition,
                        tool,
                    },
                )
            })
            .collect();
        Self { registry, skills }
    }

    pub fn kind(&self, name: &str) -> Option<ToolKind<'_>> {
        if name == ASK_USER {
            return Some(ToolKind::AskUser);
        }
        if let Some(meta) = MetaTool::from_name(name) {
            return Some(ToolKind::Meta(meta));
        }
        if let Some(skill) = self.skills.get(name) {
            return Some(ToolKind::Skill(skill));
        }
        self.registry
            .get(name)
            .map(|entry| ToolKind::Registered(&entry.tool))
    }

    /// Approval scope of a tool; engine tools and skills never need approval.
    pub fn approval_scope(&self, name: &str) -> ApprovalScope {
        self.registry
            .get(name)
            .map(|entry| entry.approval)
            .unwrap_or(ApprovalScope::None)
    }

    pub fn definitions_for(&self, agent: AgentName) -> Vec<ToolDefinition> {
        match agent {
            AgentName::Main => {
                let mut defs: Vec<ToolDefinition> = self
                    .registry
                    .values()
                    .map(|entry| entry.definition.clone())
                    .collect();
                defs.push(ask_user_definition());
                defs.extend(self.skills.definitions());
                defs
            }
            AgentName::Meta => MetaTool::ALL.into_iter().map(MetaTool::definition).collect(),
        }
    }

    pub fn skills(&self) -> &SkillCatalog {
        &self.skills
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }
}

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    /// The `tool` message answering the call.
    pub message: ChatMessage,
    /// System message to place after the tool-result block.
    pub injected: Option<ChatMessage>,
    /// Human-facing notices, separate from what the model sees.
    pub notices: Vec<String>,
}

impl ToolExecution {
    fn result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            message: ChatMessage::tool(call.id.clone(), content),
            injected: None,
            notices: Vec::new(),
        }
    }
}

pub fn call_notice(call: &ToolCall) -> String {
    format!("[system] Tool call: {} {}", call.name, call.arguments)
}

/// Question carried by an `ask_user` call.
pub fn ask_user_question(call: &ToolCall) -> String {
    serde_json::from_str::<serde_json::Value>(&call.arguments)
        .ok()
        .and_then(|args| {
            args.get("question")
                .and_then(|q| q.as_str())
                .map(|q| q.trim().to_string())
        })
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string())
}

fn parse_arguments(raw: &str) -> std::result::Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn shell_notices(payload: &serde_json::Value) -> Vec<String> {
    match ShellOutcome::from_payload(payload) {
        ShellOutcome::Succeeded => Vec::new(),
        ShellOutcome::Errored(error) => vec![format!("[system] Shell error: {error}")],
        ShellOutcome::Failed { code, detail } => {
            vec![format!("[system] Shell command failed (exit {code}): {detail}")]
        }
    }
}

#[tracing::instrument(
    level = "info",
    skip_all,
    fields(tool_name = %call.name, tool_call_id = %call.id)
)]
pub(crate) async fn execute_call(
    rt: &Runtime,
    state: &mut RoomState,
    call: &ToolCall,
) -> Result<ToolExecution> {
    let Some(kind) = rt.catalog.kind(&call.name) else {
        return Err(EngineError::Invariant(format!(
            "unknown tool `{}` reached the dispatcher",
            call.name
        )));
    };
    let args = match parse_arguments(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(error = %e, "tool call arguments are not valid JSON");
            return Ok(ToolExecution::result(
                call,
                format!("ERROR: invalid JSON arguments: {e}"),
            ));
        }
    };

    let started = Instant::now();
    let execution = match kind {
        ToolKind::AskUser => {
            return Err(EngineError::Invariant(
                "ask_user must suspend the loop before dispatch".to_string(),
            ));
        }
        ToolKind::Skill(skill) => ToolExecution {
            message: ChatMessage::tool(call.id.clone(), format!("Skill applied: {}", skill.name)),
            injected: Some(ChatMessage::system(skill.instructions_message())),
            notices: Vec::new(),
        },
        ToolKind::Meta(meta) => {
            let content = run_meta(rt, state, meta, &args).await?;
            ToolExecution::result(call, content)
        }
        ToolKind::Registered(tool) => match tool.execute(args).await {
            Ok(output) => {
                let notices = if call.name == "run_shell" {
                    shell_notices(&output)
                } else {
                    Vec::new()
                };
                ToolExecution {
                    message: ChatMessage::tool(call.id.clone(), render_output(&output)),
                    injected: None,
                    notices,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool execution failed");
                ToolExecution::result(call, format!("ERROR: {e}"))
            }
        },
    };

    tracing::info!(
        event = "tool_result",
        latency_ms = started.elapsed().as_millis() as u64,
        output_len = execution.message.content.len(),
        notices = execution.notices.len(),
        "tool call executed"
    );
    Ok(execution)
}

fn target_agent(args: &serde_json::Value) -> (String, Option<AgentName>) {
    let raw = args
        .get("agent")
        .and_then(|v| v.as_str())
        .unwrap_or("main")
        .trim()
        .to_ascii_lowercase();
    let agent = AgentName::parse(&raw);
    (raw, agent)
}

fn text_arg(args: &serde_json::Value, key: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

async fn run_meta(
    rt: &Runtime,
    state: &mut RoomState,
    meta: MetaTool,
    args: &serde_json::Value,
) -> Result<String> {
    let (raw_agent, agent) = target_agent(args);
    match meta {
        MetaTool::Ask => {
            let text = text_arg(args, "text");
            if text.is_empty() {
                return Ok("ERROR: text is required".to_string());
            }
            let Some(agent) = agent else {
                return Ok(format!("ERROR: unknown agent `{raw_agent}`"));
            };
            agent_ask(rt, state, agent, &text).await
        }
        MetaTool::SetModel => {
            let model = text_arg(args, "model");
            if raw_agent.is_empty() || model.is_empty() {
                return Ok("ERROR: agent and model are required".to_string());
            }
            match agent {
                Some(agent) if rt.settings.available_models.contains(&model) => {
                    state
                        .conversation_mut(agent, &rt.settings.default_model)
                        .model = model.clone();
                    tracing::info!(agent = %agent, model = %model, "agent model changed");
                    Ok(format!("Model set to `{model}` for `{agent}`."))
                }
                _ => Ok(format!(
                    "ERROR: unknown model `{model}` or agent `{raw_agent}`"
                )),
            }
        }
        MetaTool::RecentToolCalls => {
            let limit = args
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(RECENT_DEFAULT_LIMIT)
                .clamp(1, crate::engine::state::RECENT_TOOL_CALLS_MAX);
            let records = match agent.and_then(|a| state.agents.get(&a)) {
                Some(agent_state) => agent_state.recent_tool_calls(limit),
                None => Vec::new(),
            };
            Ok(serde_json::to_string(&records)?)
        }
    }
}

/// Asks `agent` a one-off question in its active conversation, without tools.
async fn agent_ask(
    rt: &Runtime,
    state: &mut RoomState,
    agent: AgentName,
    text: &str,
) -> Result<String> {
    let default_model = rt.settings.default_model.as_str();
    let conversation = state.conversation_mut(agent, default_model);
    conversation.ensure_system_prompt(rt.settings.system_prompt(agent));
    conversation.messages.push(ChatMessage::user(text));
    let model = conversation.model.clone();
    conversation.messages = rt.trimmer.trim(&conversation.messages, &model);
    let request = normalize_for_transport(&conversation.messages);

    tracing::info!(event = "llm_request", agent = %agent, model = %model, messages = request.len(), "delegating to agent");
    let response = rt.llm.complete(&model, &request, &[]).await?;

    let conversation = state.conversation_mut(agent, default_model);
    if let Some(answer) = response.message.without_tool_calls() {
        conversation.messages.push(answer);
        conversation.messages = rt.trimmer.trim(&conversation.messages, &model);
    }
    let answer = response.message.content.trim();
    Ok(if answer.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        answer.to_string()
    })
}
