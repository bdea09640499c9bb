//! Agent execution engine.
//!
//! One call to [`Engine::invoke`] is one turn for one room: load the room's
//! checkpoint, resolve a pending suspension or run a command or run the
//! planner and LLM loop, then save the checkpoint. A turn either completes,
//! suspends awaiting the next message, or is cancelled; a cancelled turn
//! saves nothing.

pub mod approval;
pub mod dispatch;
pub mod error;
pub mod instructions;
pub mod llm_loop;
pub mod paths;
pub mod planner;
pub mod state;
pub mod trim;

#[cfg(test)]
mod tests;

use crate::commands::{self, CommandContext};
use crate::store::RoomStore;
use crate::streams::StreamRegistry;
use dispatch::ToolCatalog;
use llm_loop::{LoopEntry, LoopInput, LoopOutcome, LoopRun, emit, run_loop};
use serde::{Deserialize, Serialize};
use state::{AgentName, ApprovalRequest, PendingApproval, PlanState, RoomState};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use trim::{HistoryTrimmer, ModelWindows};
use yb_llm::{ChatMessage, ChatModel, TokenSink};

pub use error::{EngineError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Yabot, a coding-first assistant.\n\
Primary task: help with software engineering tasks (code, tests, debugging, refactors).\n\
Always follow project instructions in any AGENTS.md file relevant to the task.\n\
If the user doesn't specify a target directory, assume the current working directory is the target.\n\
Be concise and precise. Ask clarifying questions only when needed.";

pub const DEFAULT_META_PROMPT: &str = "You are Yabot's meta agent.\n\
You coordinate the other agents in this room: ask them questions with agent_ask, \
change their model with agent_set_model and review their recent tool calls with agent_recent_tool_calls.\n\
Answer the user directly when no delegation is needed.";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_model: String,
    pub available_models: Vec<String>,
    pub default_agent: AgentName,
    /// User/assistant pairs kept by the history trimmer.
    pub max_turns: usize,
    pub max_tool_rounds: usize,
    pub context_windows: BTreeMap<String, usize>,
    pub main_prompt: String,
    pub meta_prompt: String,
    pub instructions_file: String,
    pub workdir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            available_models: vec!["gpt-4o-mini".to_string(), "gpt-5.2".to_string()],
            default_agent: AgentName::Main,
            max_turns: 30,
            max_tool_rounds: 25,
            context_windows: BTreeMap::new(),
            main_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            meta_prompt: DEFAULT_META_PROMPT.to_string(),
            instructions_file: "AGENTS.md".to_string(),
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl EngineSettings {
    pub fn system_prompt(&self, agent: AgentName) -> &str {
        match agent {
            AgentName::Main => &self.main_prompt,
            AgentName::Meta => &self.meta_prompt,
        }
    }
}

/// Collaborators shared by every turn.
pub(crate) struct Runtime {
    pub llm: Arc<dyn ChatModel>,
    pub catalog: ToolCatalog,
    pub trimmer: HistoryTrimmer,
    pub settings: EngineSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// Waiting for an approval reply or a clarification answer.
    Suspended,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub status: TurnStatus,
    pub responses: Vec<String>,
    pub active_conversation: String,
    pub model: String,
    #[serde(default)]
    pub tool_notices: Vec<String>,
}

impl TurnResult {
    pub fn cancelled(active_conversation: String, model: String) -> Self {
        Self {
            status: TurnStatus::Cancelled,
            responses: Vec::new(),
            active_conversation,
            model,
            tool_notices: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct TurnOutput {
    responses: Vec<String>,
    notices: Vec<String>,
    suspended: bool,
}

impl TurnOutput {
    fn into_result(self, state: &RoomState) -> TurnResult {
        let (active_conversation, model) = state.active_summary();
        TurnResult {
            status: if self.suspended {
                TurnStatus::Suspended
            } else {
                TurnStatus::Completed
            },
            responses: self.responses,
            active_conversation,
            model,
            tool_notices: self.notices,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    rt: Arc<Runtime>,
    store: RoomStore,
    streams: StreamRegistry,
}

impl Engine {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        catalog: ToolCatalog,
        settings: EngineSettings,
        store: RoomStore,
    ) -> Self {
        let trimmer = HistoryTrimmer::new(
            settings.max_turns,
            ModelWindows::with_overrides(settings.context_windows.clone()),
        );
        Self {
            rt: Arc::new(Runtime {
                llm,
                catalog,
                trimmer,
                settings,
            }),
            store,
            streams: StreamRegistry::new(),
        }
    }

    pub async fn invoke(&self, room_id: &str, text: &str) -> Result<TurnResult> {
        self.run_turn(room_id, text, None).await
    }

    /// Like [`Engine::invoke`], forwarding token fragments and system lines to `sink`.
    pub async fn invoke_stream(&self, room_id: &str, text: &str, sink: &TokenSink) -> Result<TurnResult> {
        self.run_turn(room_id, text, Some(sink)).await
    }

    pub fn is_running(&self, room_id: &str) -> bool {
        self.streams.is_active(room_id)
    }

    /// Cancels the room's in-flight turn. False when nothing was running.
    pub fn stop(&self, room_id: &str) -> bool {
        self.streams.stop(room_id)
    }

    async fn load_state(&self, room_id: &str) -> Result<RoomState> {
        Ok(self.store.load(room_id).await?.unwrap_or_else(|| {
            RoomState::new(self.rt.settings.default_agent, &self.rt.settings.default_model)
        }))
    }

    #[tracing::instrument(level = "info", skip_all, fields(room_id = %room_id))]
    async fn run_turn(&self, room_id: &str, text: &str, sink: Option<&TokenSink>) -> Result<TurnResult> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(EngineError::InvalidInput("room id must not be empty".to_string()));
        }

        if commands::is_stop(text) {
            let stopped = self.stop(room_id);
            let response = commands::stop_response(stopped).to_string();
            emit(sink, &response);
            let state = self.load_state(room_id).await?;
            return Ok(TurnOutput {
                responses: vec![response],
                ..TurnOutput::default()
            }
            .into_result(&state));
        }

        let guard = self.streams.register(room_id);
        let token = guard.token().clone();
        tracing::info!(event = "turn_start", text_len = text.len(), stream = sink.is_some(), "turn started");

        // Saving happens after the race; a dropped blocking save would still commit.
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.process(room_id, text, sink) => Some(result),
        };
        drop(guard);
        let outcome = match outcome {
            Some(_) if token.is_cancelled() => None,
            Some(Ok((state, output))) => Some(self.save_turn(room_id, state, output).await),
            Some(Err(e)) => Some(Err(e)),
            None => None,
        };

        match outcome {
            Some(result) => {
                match &result {
                    Ok(r) => tracing::info!(
                        event = "turn_end",
                        status = ?r.status,
                        responses = r.responses.len(),
                        "turn finished"
                    ),
                    Err(e) => tracing::error!(event = "turn_end", error = %e, "turn failed"),
                }
                result
            }
            None => {
                tracing::info!(event = "turn_end", status = "cancelled", "turn cancelled");
                let state = self.load_state(room_id).await?;
                let (active_conversation, model) = state.active_summary();
                Ok(TurnResult::cancelled(active_conversation, model))
            }
        }
    }

    async fn process(
        &self,
        room_id: &str,
        text: &str,
        sink: Option<&TokenSink>,
    ) -> Result<(RoomState, TurnOutput)> {
        let mut state = self.load_state(room_id).await?;
        let output = process_turn(&self.rt, &mut state, text, sink).await?;
        Ok((state, output))
    }

    async fn save_turn(&self, room_id: &str, state: RoomState, output: TurnOutput) -> Result<TurnResult> {
        self.store.save(room_id, &state).await?;
        Ok(output.into_result(&state))
    }
}

/// Ensures the agent's system prompt and the workdir instruction file.
async fn prepare_conversation(rt: &Runtime, state: &mut RoomState, agent: AgentName) {
    let conversation = state.conversation_mut(agent, &rt.settings.default_model);
    conversation.ensure_system_prompt(rt.settings.system_prompt(agent));
    let injected = instructions::load_new_instructions(
        &rt.settings.instructions_file,
        &mut conversation.agents_loaded,
        std::slice::from_ref(&rt.settings.workdir),
    )
    .await;
    conversation.messages.extend(injected);
}

async fn process_turn(
    rt: &Runtime,
    state: &mut RoomState,
    text: &str,
    sink: Option<&TokenSink>,
) -> Result<TurnOutput> {
    let text = text.trim();

    if let Some(pending) = state.pending.take() {
        return resume(rt, state, pending, text, sink).await;
    }

    if let Some(command) = commands::parse_command(text) {
        let ctx = CommandContext {
            available_models: &rt.settings.available_models,
            default_model: &rt.settings.default_model,
            trimmer: &rt.trimmer,
        };
        let response = commands::handle_command(&ctx, state, &command);
        emit(sink, &response);
        return Ok(TurnOutput {
            responses: vec![response],
            ..TurnOutput::default()
        });
    }

    if text.is_empty() {
        return Err(EngineError::InvalidInput("message must not be empty".to_string()));
    }

    let agent = state.active_agent;
    prepare_conversation(rt, state, agent).await;

    let default_model = rt.settings.default_model.as_str();
    let conversation = state.conversation_mut(agent, default_model);
    conversation.messages.push(ChatMessage::user(text));
    let model = conversation.model.clone();
    conversation.messages = rt.trimmer.trim(&conversation.messages, &model);
    tracing::info!(
        agent = %agent,
        conversation_id = %conversation.id,
        model = %model,
        history = conversation.messages.len(),
        "fresh request"
    );

    let mut output = TurnOutput::default();

    if planner::is_complex(text) {
        let steps = planner::make_plan(rt.llm.as_ref(), &model, text).await?;
        if !steps.is_empty() {
            let conversation = state.conversation_mut(agent, default_model);
            conversation.messages.push(planner::plan_history_message(&steps));
            conversation.messages = rt.trimmer.trim(&conversation.messages, &model);

            let listing = planner::plan_listing(&steps);
            emit(sink, &listing);
            output.responses.push(listing);
            state.plan = Some(PlanState { steps, index: 0 });
            run_plan(rt, state, agent, sink, &mut output).await?;
            return Ok(output);
        }
    }

    let transcript = state.conversation_mut(agent, default_model).messages.clone();
    let run = run_loop(
        rt,
        state,
        LoopInput {
            agent,
            model: &model,
            transcript,
            sink,
        },
        LoopEntry::AwaitModel,
    )
    .await?;
    commit(rt, state, agent, Vec::new(), run, &mut output);
    Ok(output)
}

/// Appends a finished or suspended run to the agent's conversation and folds
/// its responses into the turn output.
fn commit(
    rt: &Runtime,
    state: &mut RoomState,
    agent: AgentName,
    prefix: Vec<ChatMessage>,
    run: LoopRun,
    output: &mut TurnOutput,
) {
    let LoopRun {
        outcome,
        new_messages,
        notices,
    } = run;

    let conversation = state.conversation_mut(agent, &rt.settings.default_model);
    conversation.messages.extend(prefix);
    conversation.messages.extend(new_messages);
    conversation.messages = rt.trimmer.trim(&conversation.messages, &conversation.model);

    output.responses.extend(notices.iter().cloned());
    output.notices.extend(notices);
    match outcome {
        LoopOutcome::Done { responses } => output.responses.extend(responses),
        LoopOutcome::Suspended { pending, prompt } => {
            state.pending = Some(pending);
            output.responses.push(prompt);
            output.suspended = true;
        }
    }
}

/// Runs plan steps from the current index until the plan finishes or a step
/// suspends. A suspended step keeps its index so it is re-entered on resume.
async fn run_plan(
    rt: &Runtime,
    state: &mut RoomState,
    agent: AgentName,
    sink: Option<&TokenSink>,
    output: &mut TurnOutput,
) -> Result<()> {
    let default_model = rt.settings.default_model.as_str();
    loop {
        let Some(plan) = state.plan.as_ref() else {
            return Ok(());
        };
        let (index, total) = (plan.index, plan.steps.len());
        let Some(step) = plan.steps.get(index).cloned() else {
            tracing::info!(steps = total, "plan completed");
            state.plan = None;
            return Ok(());
        };

        let header = planner::step_header(index, total, &step);
        emit(sink, &header);
        output.responses.push(header);
        tracing::info!(event = "plan_step", step = index + 1, total, "running plan step");

        let conversation = state.conversation_mut(agent, default_model);
        conversation.messages.push(planner::step_message(index, total, &step));
        let model = conversation.model.clone();
        conversation.messages = rt.trimmer.trim(&conversation.messages, &model);
        let transcript = conversation.messages.clone();

        let run = run_loop(
            rt,
            state,
            LoopInput {
                agent,
                model: &model,
                transcript,
                sink,
            },
            LoopEntry::AwaitModel,
        )
        .await?;
        commit(rt, state, agent, Vec::new(), run, output);
        if output.suspended {
            return Ok(());
        }
        if let Some(plan) = state.plan.as_mut() {
            plan.index += 1;
        }
    }
}

/// Routes `reply` to the suspension captured in `pending`.
#[tracing::instrument(level = "info", skip_all, fields(agent = %pending.agent, kind = pending.request.kind()))]
async fn resume(
    rt: &Runtime,
    state: &mut RoomState,
    pending: PendingApproval,
    reply: &str,
    sink: Option<&TokenSink>,
) -> Result<TurnOutput> {
    let agent = pending.agent;
    let calls = if pending.tool_calls.is_empty() {
        pending.assistant.tool_calls.clone()
    } else {
        pending.tool_calls.clone()
    };
    if calls.is_empty() {
        return Err(EngineError::Invariant(
            "pending approval carries no tool calls".to_string(),
        ));
    }

    prepare_conversation(rt, state, agent).await;
    let conversation = state.conversation_mut(agent, &rt.settings.default_model);
    let model = conversation.model.clone();
    let mut transcript = conversation.messages.clone();

    let (prefix, entry) = match &pending.request {
        ApprovalRequest::AskUser { tool_call_id, .. } => {
            tracing::info!(event = "approval_resolved", answered = true, "clarification answered");
            (
                llm_loop::clarification_prefix(&pending, tool_call_id, reply),
                LoopEntry::AwaitModel,
            )
        }
        request if llm_loop::is_approval(reply) => {
            state.approvals.grant(request);
            tracing::info!(event = "approval_resolved", approved = true, "approval granted");
            (
                Vec::new(),
                LoopEntry::ToolCalls {
                    assistant: pending.assistant.clone(),
                    calls,
                },
            )
        }
        _ => {
            tracing::info!(event = "approval_resolved", approved = false, "approval denied");
            (llm_loop::denial_prefix(&pending, reply), LoopEntry::AwaitModel)
        }
    };
    transcript.extend(prefix.iter().cloned());

    let mut output = TurnOutput::default();
    let run = run_loop(
        rt,
        state,
        LoopInput {
            agent,
            model: &model,
            transcript,
            sink,
        },
        entry,
    )
    .await?;
    commit(rt, state, agent, prefix, run, &mut output);

    if !output.suspended && state.plan.is_some() {
        if let Some(plan) = state.plan.as_mut() {
            plan.index += 1;
        }
        run_plan(rt, state, agent, sink, &mut output).await?;
    }
    Ok(output)
}
