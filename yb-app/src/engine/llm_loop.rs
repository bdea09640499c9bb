//! The resumable tool-calling loop.
//!
//! One invocation drives `AwaitModel -> HaveToolCalls -> ... -> Done` and
//! may stop early in `Suspended`, returning a [`PendingApproval`] that holds
//! everything needed to re-enter at `HaveToolCalls` or `AwaitModel` later,
//! possibly in another process. Messages are collected in `new_messages`
//! and only committed to the conversation by the caller.

use crate::engine::Runtime;
use crate::engine::approval::{first_missing_approval, instruction_dirs};
use crate::engine::dispatch::{self, ASK_USER, NO_OUTPUT, ToolCatalog};
use crate::engine::error::Result;
use crate::engine::instructions::load_new_instructions;
use crate::engine::state::{AgentName, ApprovalLedger, ApprovalRequest, PendingApproval, RoomState};
use crate::engine::trim::normalize_for_transport;
use std::time::Instant;
use yb_llm::{ChatMessage, TokenSink, ToolCall};

pub const NOT_EXECUTED: &str = "ERROR: not executed; the turn paused for a clarification question";

/// Where a loop run starts.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEntry {
    AwaitModel,
    /// Replay a captured batch without asking the model again.
    ToolCalls {
        assistant: ChatMessage,
        calls: Vec<ToolCall>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum LoopState {
    AwaitModel,
    HaveToolCalls {
        assistant: ChatMessage,
        calls: Vec<ToolCall>,
    },
    Done {
        content: String,
    },
    Suspended {
        pending: PendingApproval,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Done { responses: Vec<String> },
    Suspended { pending: PendingApproval, prompt: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopRun {
    pub outcome: LoopOutcome,
    /// Messages to append to the conversation, in order. Never contains the
    /// assistant message held by a suspension.
    pub new_messages: Vec<ChatMessage>,
    pub notices: Vec<String>,
}

pub(crate) struct LoopInput<'a> {
    pub agent: AgentName,
    pub model: &'a str,
    /// Conversation history the run continues from, plus any resumption prefix.
    pub transcript: Vec<ChatMessage>,
    pub sink: Option<&'a TokenSink>,
}

/// Decision for a batch of tool calls proposed by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDecision {
    Suspend(ApprovalRequest),
    Execute,
}

pub fn decide_batch(ledger: &ApprovalLedger, catalog: &ToolCatalog, calls: &[ToolCall]) -> BatchDecision {
    if let Some(call) = calls.iter().find(|c| c.name == ASK_USER) {
        return BatchDecision::Suspend(ApprovalRequest::AskUser {
            tool_call_id: call.id.clone(),
            question: dispatch::ask_user_question(call),
        });
    }
    match first_missing_approval(ledger, catalog, calls) {
        Some(request) => BatchDecision::Suspend(request),
        None => BatchDecision::Execute,
    }
}

fn after_model_reply(message: ChatMessage) -> LoopState {
    if message.has_tool_calls() {
        let calls = message.tool_calls.clone();
        LoopState::HaveToolCalls {
            assistant: message,
            calls,
        }
    } else {
        LoopState::Done {
            content: message.content,
        }
    }
}

/// Final text split on blank lines; empty text yields the placeholder.
pub fn final_responses(content: &str) -> Vec<String> {
    let parts: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        vec![NO_OUTPUT.to_string()]
    } else {
        parts
    }
}

pub fn is_approval(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("y")
}

/// History prefix that answers a clarification suspension with `reply`.
pub fn clarification_prefix(pending: &PendingApproval, tool_call_id: &str, reply: &str) -> Vec<ChatMessage> {
    let mut prefix = vec![
        pending.assistant.clone(),
        ChatMessage::tool(tool_call_id, reply),
    ];
    prefix.extend(
        pending
            .tool_calls
            .iter()
            .filter(|c| c.id != tool_call_id)
            .map(|c| ChatMessage::tool(c.id.clone(), NOT_EXECUTED)),
    );
    prefix
}

/// History prefix for a denied approval: the model sees prose, not the calls.
pub fn denial_prefix(pending: &PendingApproval, reply: &str) -> Vec<ChatMessage> {
    let mut prefix: Vec<ChatMessage> = pending.assistant.without_tool_calls().into_iter().collect();
    prefix.push(ChatMessage::user(format!(
        "Approval denied. Feedback: {}",
        reply.trim()
    )));
    prefix
}

pub(crate) fn emit(sink: Option<&TokenSink>, line: &str) {
    if let Some(sink) = sink {
        let _ = sink.send(format!("{line}\n"));
    }
}

#[tracing::instrument(
    level = "info",
    skip_all,
    fields(agent = %input.agent, model = %input.model)
)]
pub(crate) async fn run_loop(
    rt: &Runtime,
    room: &mut RoomState,
    input: LoopInput<'_>,
    entry: LoopEntry,
) -> Result<LoopRun> {
    let LoopInput {
        agent,
        model,
        transcript: mut working,
        sink,
    } = input;
    let tools = rt.catalog.definitions_for(agent);
    let mut new_messages: Vec<ChatMessage> = Vec::new();
    let mut notices: Vec<String> = Vec::new();
    let mut rounds = 0usize;

    let mut state = match entry {
        LoopEntry::AwaitModel => LoopState::AwaitModel,
        LoopEntry::ToolCalls { assistant, calls } => LoopState::HaveToolCalls { assistant, calls },
    };

    loop {
        state = match state {
            LoopState::AwaitModel => {
                let request = normalize_for_transport(&rt.trimmer.trim(&working, model));
                tracing::info!(
                    event = "llm_request",
                    messages = request.len(),
                    tools = tools.len(),
                    stream = sink.is_some(),
                    "requesting completion"
                );
                let started = Instant::now();
                let response = match sink {
                    Some(sink) => rt.llm.complete_stream(model, &request, &tools, sink).await?,
                    None => rt.llm.complete(model, &request, &tools).await?,
                };
                tracing::info!(
                    event = "llm_response",
                    latency_ms = started.elapsed().as_millis() as u64,
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    tool_calls = response.message.tool_calls.len(),
                    content_len = response.message.content.len(),
                    "completion received"
                );
                let message = response.message;
                if message.has_tool_calls() {
                    let agent_state = room.agent_mut(agent, &rt.settings.default_model);
                    for call in &message.tool_calls {
                        agent_state.record_tool_call(call);
                        let notice = dispatch::call_notice(call);
                        emit(sink, &notice);
                        notices.push(notice);
                    }
                } else {
                    working.push(message.clone());
                    new_messages.push(message.clone());
                }
                after_model_reply(message)
            }

            LoopState::HaveToolCalls { assistant, calls } => {
                match decide_batch(&room.approvals, &rt.catalog, &calls) {
                    BatchDecision::Suspend(request) => LoopState::Suspended {
                        pending: PendingApproval {
                            request,
                            assistant,
                            tool_calls: calls,
                            agent,
                        },
                    },
                    BatchDecision::Execute => {
                        working.push(assistant.clone());
                        new_messages.push(assistant);

                        let dirs = instruction_dirs(&rt.catalog, &calls);
                        let conversation = room.conversation_mut(agent, &rt.settings.default_model);
                        let mut trailing = load_new_instructions(
                            &rt.settings.instructions_file,
                            &mut conversation.agents_loaded,
                            &dirs,
                        )
                        .await;

                        for call in &calls {
                            tracing::info!(
                                event = "tool_call",
                                tool_name = %call.name,
                                tool_call_id = %call.id,
                                arguments_len = call.arguments.len(),
                                "executing tool call"
                            );
                            let execution = dispatch::execute_call(rt, room, call).await?;
                            for notice in execution.notices {
                                emit(sink, &notice);
                                notices.push(notice);
                            }
                            working.push(execution.message.clone());
                            new_messages.push(execution.message);
                            trailing.extend(execution.injected);
                        }
                        working.extend(trailing.iter().cloned());
                        new_messages.extend(trailing);

                        rounds += 1;
                        if rounds >= rt.settings.max_tool_rounds {
                            tracing::warn!(rounds, "tool round limit reached");
                            let content = format!(
                                "Stopped after {rounds} tool rounds without a final answer."
                            );
                            new_messages.push(ChatMessage::assistant(content.clone()));
                            LoopState::Done { content }
                        } else {
                            LoopState::AwaitModel
                        }
                    }
                }
            }

            LoopState::Done { content } => {
                let responses = final_responses(&content);
                tracing::info!(
                    responses = responses.len(),
                    new_messages = new_messages.len(),
                    rounds,
                    "loop finished"
                );
                return Ok(LoopRun {
                    outcome: LoopOutcome::Done { responses },
                    new_messages,
                    notices,
                });
            }

            LoopState::Suspended { pending } => {
                let prompt = pending.request.prompt();
                emit(sink, &prompt);
                tracing::info!(
                    event = "approval_requested",
                    kind = pending.request.kind(),
                    tool_calls = pending.tool_calls.len(),
                    "loop suspended"
                );
                return Ok(LoopRun {
                    outcome: LoopOutcome::Suspended { pending, prompt },
                    new_messages,
                    notices,
                });
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillCatalog;
    use std::sync::Arc;
    use std::time::Duration;
    use yb_tools::{ShellTool, Tool};

    fn pending(calls: Vec<ToolCall>) -> PendingApproval {
        PendingApproval {
            request: ApprovalRequest::AskUser {
                tool_call_id: "ask".to_string(),
                question: "Which dir?".to_string(),
            },
            assistant: ChatMessage::assistant_with_tool_calls("checking", calls.clone()),
            tool_calls: calls,
            agent: AgentName::Main,
        }
    }

    #[test]
    fn ask_user_wins_over_approvals() {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ShellTool::new(Duration::from_secs(1), 100))];
        let catalog = ToolCatalog::new(tools, SkillCatalog::default());
        let calls = vec![
            ToolCall::new("sh", "run_shell", r#"{"command":"ls"}"#),
            ToolCall::new("ask", "ask_user", r#"{"question":"Which dir?"}"#),
        ];
        assert_eq!(
            decide_batch(&ApprovalLedger::default(), &catalog, &calls),
            BatchDecision::Suspend(ApprovalRequest::AskUser {
                tool_call_id: "ask".to_string(),
                question: "Which dir?".to_string()
            })
        );
        assert_eq!(
            decide_batch(&ApprovalLedger::default(), &catalog, &calls[..1]),
            BatchDecision::Suspend(ApprovalRequest::Shell {
                command: "ls".to_string(),
                workdir: None
            })
        );
    }

    #[test]
    fn model_reply_transitions() {
        let call = ToolCall::new("c1", "list_dir", "{}");
        assert_eq!(
            after_model_reply(ChatMessage::assistant_with_tool_calls("", vec![call.clone()])),
            LoopState::HaveToolCalls {
                assistant: ChatMessage::assistant_with_tool_calls("", vec![call.clone()]),
                calls: vec![call],
            }
        );
        assert_eq!(
            after_model_reply(ChatMessage::assistant("done")),
            LoopState::Done {
                content: "done".to_string()
            }
        );
    }

    #[test]
    fn final_text_is_split_on_blank_lines() {
        assert_eq!(final_responses("one\n\n  two \n\n\n"), vec!["one", "two"]);
        assert_eq!(final_responses("   "), vec![NO_OUTPUT]);
    }

    #[test]
    fn clarification_prefix_answers_every_call() {
        let calls = vec![
            ToolCall::new("ls", "list_dir", "{}"),
            ToolCall::new("ask", "ask_user", "{}"),
        ];
        let p = pending(calls.clone());
        assert_eq!(
            clarification_prefix(&p, "ask", "the src dir"),
            vec![
                ChatMessage::assistant_with_tool_calls("checking", calls),
                ChatMessage::tool("ask", "the src dir"),
                ChatMessage::tool("ls", NOT_EXECUTED),
            ]
        );
    }

    #[test]
    fn denial_prefix_keeps_only_prose() {
        let p = pending(vec![ToolCall::new("ask", "ask_user", "{}")]);
        assert_eq!(
            denial_prefix(&p, " use git instead "),
            vec![
                ChatMessage::assistant("checking"),
                ChatMessage::user("Approval denied. Feedback: use git instead"),
            ]
        );
        assert!(is_approval(" Y "));
        assert!(!is_approval("yes"));
    }
}
