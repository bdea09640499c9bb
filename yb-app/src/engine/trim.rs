//! Token-budget history trimming and transport normalization.

use std::collections::{BTreeMap, HashSet};
use yb_llm::{ChatMessage, Role};

pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;
const MIN_OUTPUT_RESERVE: usize = 2048;
const MESSAGE_OVERHEAD: usize = 3;
const NAMED_FIELD_OVERHEAD: usize = 1;
const PRIMING_OVERHEAD: usize = 3;

// Longest prefix wins.
const BUILTIN_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o-mini", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("gpt-5", 400_000),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4-mini", 200_000),
];

fn encoded_len(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let mut tokens = MESSAGE_OVERHEAD + encoded_len(message.role.as_str()) + encoded_len(&message.content);
    if let Some(id) = &message.tool_call_id {
        tokens += encoded_len(id);
    }
    for call in &message.tool_calls {
        tokens += NAMED_FIELD_OVERHEAD
            + encoded_len(&call.id)
            + encoded_len(&call.name)
            + encoded_len(&call.arguments);
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    if messages.is_empty() {
        return 0;
    }
    PRIMING_OVERHEAD + messages.iter().map(estimate_message_tokens).sum::<usize>()
}

/// Context window sizes by model name.
#[derive(Debug, Clone, Default)]
pub struct ModelWindows {
    overrides: BTreeMap<String, usize>,
}

impl ModelWindows {
    pub fn with_overrides(overrides: BTreeMap<String, usize>) -> Self {
        Self { overrides }
    }

    pub fn window(&self, model: &str) -> usize {
        if let Some(window) = self.overrides.get(model) {
            return *window;
        }
        BUILTIN_WINDOWS
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, window)| *window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }

    /// Window minus the reserved output allowance.
    pub fn input_budget(&self, model: &str) -> usize {
        let window = self.window(model);
        window.saturating_sub(MIN_OUTPUT_RESERVE.max(window / 10))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub used: usize,
    pub budget: usize,
}

impl ContextUsage {
    pub fn remaining_percent(&self) -> usize {
        if self.budget == 0 {
            return 0;
        }
        self.budget.saturating_sub(self.used) * 100 / self.budget
    }
}

#[derive(Debug, Clone)]
pub struct HistoryTrimmer {
    max_turns: usize,
    windows: ModelWindows,
}

impl HistoryTrimmer {
    pub fn new(max_turns: usize, windows: ModelWindows) -> Self {
        Self { max_turns, windows }
    }

    /// Keeps every system message plus the last `2 * max_turns` others, in
    /// their original relative order, then evicts oldest-first (non-system
    /// before system) until the estimate fits the model's input budget.
    pub fn trim(&self, messages: &[ChatMessage], model: &str) -> Vec<ChatMessage> {
        let keep_recent = self.max_turns.saturating_mul(2);
        let non_system = messages.iter().filter(|m| m.role != Role::System).count();
        let mut skip = non_system.saturating_sub(keep_recent);

        let mut kept: Vec<ChatMessage> = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role != Role::System && skip > 0 {
                skip -= 1;
                continue;
            }
            kept.push(message.clone());
        }

        let budget = self.windows.input_budget(model);
        let mut evicted = 0usize;
        while !kept.is_empty() && estimate_messages_tokens(&kept) > budget {
            let victim = kept
                .iter()
                .position(|m| m.role != Role::System)
                .unwrap_or(0);
            kept.remove(victim);
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(model, evicted, budget, kept = kept.len(), "history over budget");
        }
        kept
    }

    pub fn usage(&self, messages: &[ChatMessage], model: &str) -> ContextUsage {
        ContextUsage {
            used: estimate_messages_tokens(&self.trim(messages, model)),
            budget: self.windows.input_budget(model),
        }
    }
}

/// Repairs tool-call pairing before a request goes on the wire.
///
/// An assistant message keeps its `tool_calls` only when the tool block that
/// immediately follows answers every call id; otherwise it is reduced to its
/// text (or dropped) and its tool block goes with it. Tool messages that do not
/// answer the preceding assistant's calls are dropped.
pub fn normalize_for_transport(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let block_end = messages[i + 1..]
                    .iter()
                    .position(|m| m.role != Role::Tool)
                    .map(|offset| i + 1 + offset)
                    .unwrap_or(messages.len());
                let block = &messages[i + 1..block_end];
                let expected: HashSet<&str> =
                    message.tool_calls.iter().map(|c| c.id.as_str()).collect();
                let answered: HashSet<&str> = block
                    .iter()
                    .filter_map(|m| m.tool_call_id.as_deref())
                    .filter(|id| expected.contains(id))
                    .collect();

                if answered.len() == expected.len() {
                    out.push(message.clone());
                    let mut seen = HashSet::new();
                    for reply in block {
                        let Some(id) = reply.tool_call_id.as_deref() else {
                            continue;
                        };
                        if expected.contains(id) && seen.insert(id) {
                            out.push(reply.clone());
                        }
                    }
                } else if let Some(stripped) = message.without_tool_calls() {
                    out.push(stripped);
                }
                i = block_end;
            }
            Role::Tool => {
                tracing::debug!(tool_call_id = ?message.tool_call_id, "dropping orphan tool message");
                i += 1;
            }
            _ => {
                out.push(message.clone());
                i += 1;
            }
        }
    }
    out
}
