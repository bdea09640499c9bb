//! Chat commands (`!name [arg]`). Commands act on room state directly and
//! never reach the LLM loop.

use crate::engine::state::{AgentName, RoomState};
use crate::engine::trim::HistoryTrimmer;
use regex::Regex;
use std::sync::LazyLock;

static COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!([A-Za-z0-9_-]+)(?:\s+(.*))?$").expect("Invalid command regex")
});

pub const STOPPING: &str = "Stopping current response…";
pub const NOTHING_TO_STOP: &str = "No active response to stop.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub arg: String,
}

pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let caps = COMMAND.captures(text.trim())?;
    Some(ParsedCommand {
        name: caps.get(1)?.as_str().to_ascii_lowercase(),
        arg: caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

pub fn is_stop(text: &str) -> bool {
    parse_command(text).is_some_and(|c| c.name == "stop")
}

pub fn stop_response(stopped: bool) -> &'static str {
    if stopped { STOPPING } else { NOTHING_TO_STOP }
}

pub fn help_text() -> String {
    [
        "Commands:",
        "!help",
        "!models",
        "!model <name>",
        "!new",
        "!list",
        "!use <id>",
        "!reset",
        "!stop",
        "!become <main|meta>",
        "!context",
    ]
    .join("\n")
}

/// What command handling may read besides the room itself.
pub struct CommandContext<'a> {
    pub available_models: &'a [String],
    pub default_model: &'a str,
    pub trimmer: &'a HistoryTrimmer,
}

#[tracing::instrument(level = "info", skip_all, fields(command = %command.name))]
pub fn handle_command(ctx: &CommandContext<'_>, state: &mut RoomState, command: &ParsedCommand) -> String {
    tracing::info!(event = "command", arg_len = command.arg.len(), "handling command");
    let agent = state.active_agent;
    let arg = command.arg.as_str();

    match command.name.as_str() {
        "help" | "h" | "?" => help_text(),
        "models" => {
            let current = state.conversation_mut(agent, ctx.default_model).model.clone();
            let mut lines = vec!["Available models:".to_string()];
            for model in ctx.available_models {
                let mark = if *model == current { " (active)" } else { "" };
                lines.push(format!("- {model}{mark}"));
            }
            lines.join("\n")
        }
        "model" => {
            if arg.is_empty() {
                let current = &state.conversation_mut(agent, ctx.default_model).model;
                return format!("Current model: `{current}`. Usage: !model <name>");
            }
            if !ctx.available_models.iter().any(|m| m == arg) {
                return format!(
                    "Unknown model `{arg}`. Available: {}",
                    ctx.available_models.join(", ")
                );
            }
            state.conversation_mut(agent, ctx.default_model).model = arg.to_string();
            format!("Model set to `{arg}` for this room's active conversation.")
        }
        "new" => {
            let id = state
                .agent_mut(agent, ctx.default_model)
                .new_conversation(ctx.default_model);
            format!("Started new conversation for this room: `{id}`")
        }
        "list" => {
            let agent_state = state.agent_mut(agent, ctx.default_model);
            let mut lines = vec!["Conversations for this room:".to_string()];
            for (conversation, active) in agent_state.list_conversations() {
                let mark = if active { " (active)" } else { "" };
                lines.push(format!(
                    "- `{}` [{}] msgs={}{mark}",
                    conversation.id,
                    conversation.model,
                    conversation.messages.len()
                ));
            }
            lines.join("\n")
        }
        "use" => {
            if arg.is_empty() {
                return "Usage: !use <conversation_id>".to_string();
            }
            if state.agent_mut(agent, ctx.default_model).use_conversation(arg) {
                format!("Switched active conversation to `{arg}` for this room.")
            } else {
                format!("Unknown conversation `{arg}`.")
            }
        }
        "reset" => {
            state.conversation_mut(agent, ctx.default_model).reset();
            "Cleared memory for this room's active conversation.".to_string()
        }
        "become" => match AgentName::parse(arg) {
            Some(next) => {
                state.active_agent = next;
                state.agent_mut(next, ctx.default_model);
                tracing::info!(from = %agent, to = %next, "active agent switched");
                format!("Active agent is now `{next}`.")
            }
            None => "Usage: !become <main|meta>".to_string(),
        },
        "context" | "remaining-context-percentage" => {
            let conversation = state.conversation_mut(agent, ctx.default_model);
            let usage = ctx.trimmer.usage(&conversation.messages, &conversation.model);
            format!(
                "Remaining context: {}% ({}/{} tokens) for `{}`.",
                usage.remaining_percent(),
                usage.used,
                usage.budget,
                conversation.model
            )
        }
        // Reached only when no turn was registered to receive the stop.
        "stop" => NOTHING_TO_STOP.to_string(),
        other => format!("Unknown command `!{other}`. Try `!help`."),
    }
}
