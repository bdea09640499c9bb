//! Per-room session state: agent namespaces, conversations, the approval
//! ledger and the suspended-turn continuation. One `RoomState` is the unit
//! that is loaded, mutated and saved per turn.

use crate::engine::paths::{canonicalize_lenient, is_within};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use yb_llm::{ChatMessage, ToolCall};

pub const RECENT_TOOL_CALLS_MAX: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentName {
    Main,
    Meta,
}

impl AgentName {
    pub const ALL: [AgentName; 2] = [AgentName::Main, AgentName::Meta];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Main => "main",
            AgentName::Meta => "meta",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" => Some(AgentName::Main),
            "meta" => Some(AgentName::Meta),
            _ => None,
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Instruction files already injected into `messages`.
    #[serde(default)]
    pub agents_loaded: BTreeSet<String>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            messages: Vec::new(),
            agents_loaded: BTreeSet::new(),
        }
    }

    /// Prepends `prompt` as a system message unless an identical one exists.
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        if prompt.trim().is_empty() {
            return;
        }
        let present = self
            .messages
            .iter()
            .any(|m| m.role == yb_llm::Role::System && m.content == prompt);
        if !present {
            self.messages.insert(0, ChatMessage::system(prompt));
        }
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.agents_loaded.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub active: String,
    pub conversations: BTreeMap<String, Conversation>,
    #[serde(default)]
    pub recent_tool_calls: VecDeque<ToolCallRecord>,
}

impl AgentState {
    pub fn new(model: &str) -> Self {
        let id = new_conversation_id();
        let mut conversations = BTreeMap::new();
        conversations.insert(id.clone(), Conversation::new(id.clone(), model));
        Self {
            active: id,
            conversations,
            recent_tool_calls: VecDeque::new(),
        }
    }

    /// The active conversation, recreated empty if the pointer dangles.
    pub fn active_conversation_mut(&mut self, fallback_model: &str) -> &mut Conversation {
        let id = self.active.clone();
        self.conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id, fallback_model))
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.conversations.get(&self.active)
    }

    pub fn new_conversation(&mut self, model: &str) -> String {
        let mut id = new_conversation_id();
        while self.conversations.contains_key(&id) {
            id = new_conversation_id();
        }
        self.conversations
            .insert(id.clone(), Conversation::new(id.clone(), model));
        self.active = id.clone();
        id
    }

    pub fn use_conversation(&mut self, id: &str) -> bool {
        if !self.conversations.contains_key(id) {
            return false;
        }
        self.active = id.to_string();
        true
    }

    /// Active conversation first, then the rest by id.
    pub fn list_conversations(&self) -> Vec<(&Conversation, bool)> {
        let mut out: Vec<(&Conversation, bool)> = self
            .conversations
            .values()
            .map(|c| (c, c.id == self.active))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        out
    }

    pub fn record_tool_call(&mut self, call: &ToolCall) {
        self.recent_tool_calls.push_back(ToolCallRecord {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            at: Utc::now(),
        });
        while self.recent_tool_calls.len() > RECENT_TOOL_CALLS_MAX {
            self.recent_tool_calls.pop_front();
        }
    }

    pub fn recent_tool_calls(&self, limit: usize) -> Vec<ToolCallRecord> {
        let skip = self.recent_tool_calls.len().saturating_sub(limit);
        self.recent_tool_calls.iter().skip(skip).cloned().collect()
    }
}

/// Per-room allow-lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLedger {
    /// `"command\nworkdir"` keys; workdir is empty when absent.
    #[serde(default)]
    pub shell: BTreeSet<String>,
    /// Canonical absolute directories; each covers its subtree.
    #[serde(default)]
    pub dirs: BTreeSet<String>,
}

impl ApprovalLedger {
    pub fn shell_key(command: &str, workdir: Option<&str>) -> String {
        format!("{command}\n{}", workdir.unwrap_or(""))
    }

    pub fn is_shell_approved(&self, command: &str, workdir: Option<&str>) -> bool {
        self.shell.contains(&Self::shell_key(command, workdir))
    }

    pub fn approve_shell(&mut self, command: &str, workdir: Option<&str>) {
        self.shell.insert(Self::shell_key(command, workdir));
    }

    pub fn is_dir_approved(&self, path: &Path) -> bool {
        let candidate = canonicalize_lenient(path);
        self.dirs
            .iter()
            .any(|granted| is_within(&candidate, Path::new(granted)))
    }

    pub fn approve_dir(&mut self, path: &Path) {
        let canonical = canonicalize_lenient(path);
        self.dirs.insert(canonical.display().to_string());
    }

    pub fn grant(&mut self, request: &ApprovalRequest) {
        match request {
            ApprovalRequest::Shell { command, workdir } => {
                self.approve_shell(command, workdir.as_deref())
            }
            ApprovalRequest::Dir { dir } => self.approve_dir(&PathBuf::from(dir)),
            ApprovalRequest::AskUser { .. } => {}
        }
    }
}

/// What a suspended turn is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalRequest {
    Shell {
        command: String,
        #[serde(default)]
        workdir: Option<String>,
    },
    Dir {
        dir: String,
    },
    AskUser {
        tool_call_id: String,
        question: String,
    },
}

impl ApprovalRequest {
    /// Text shown to the user while the room is suspended on this request.
    pub fn prompt(&self) -> String {
        match self {
            ApprovalRequest::Shell { command, workdir } => {
                let suffix = match workdir.as_deref().filter(|w| !w.is_empty()) {
                    Some(dir) => format!(" (workdir: {dir})"),
                    None => String::new(),
                };
                format!("Approve running shell command: `{command}`{suffix}? Reply `y` to allow.")
            }
            ApprovalRequest::Dir { dir } => format!(
                "Approve access to directory `{dir}` (includes descendants)? Reply `y` to allow."
            ),
            ApprovalRequest::AskUser { question, .. } => question.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApprovalRequest::Shell { .. } => "shell",
            ApprovalRequest::Dir { .. } => "dir",
            ApprovalRequest::AskUser { .. } => "ask_user",
        }
    }
}

/// Continuation of a suspended LLM loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    /// The assistant message whose tool calls triggered the suspension. It is
    /// not part of conversation history until the suspension resolves.
    pub assistant: ChatMessage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub agent: AgentName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanState {
    pub steps: Vec<String>,
    /// Next step to run.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub active_agent: AgentName,
    #[serde(default)]
    pub agents: BTreeMap<AgentName, AgentState>,
    #[serde(default)]
    pub approvals: ApprovalLedger,
    #[serde(default)]
    pub pending: Option<PendingApproval>,
    #[serde(default)]
    pub plan: Option<PlanState>,
}

impl RoomState {
    pub fn new(active_agent: AgentName, model: &str) -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(active_agent, AgentState::new(model));
        Self {
            active_agent,
            agents,
            approvals: ApprovalLedger::default(),
            pending: None,
            plan: None,
        }
    }

    /// Agent namespace, created with one empty conversation on first use.
    pub fn agent_mut(&mut self, agent: AgentName, default_model: &str) -> &mut AgentState {
        self.agents
            .entry(agent)
            .or_insert_with(|| AgentState::new(default_model))
    }

    pub fn conversation_mut(&mut self, agent: AgentName, default_model: &str) -> &mut Conversation {
        self.agent_mut(agent, default_model)
            .active_conversation_mut(default_model)
    }

    /// `(conversation id, model)` of the active agent's active conversation.
    pub fn active_summary(&self) -> (String, String) {
        self.agents
            .get(&self.active_agent)
            .and_then(|a| a.active_conversation())
            .map(|c| (c.id.clone(), c.model.clone()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_approval_is_exact_on_command_and_workdir() {
        let mut ledger = ApprovalLedger::default();
        ledger.approve_shell("ls -la", Some("/srv"));
        ledger.approve_shell("ls -la", Some("/srv"));
        assert_eq!(ledger.shell.len(), 1);
        assert!(ledger.is_shell_approved("ls -la", Some("/srv")));
        assert!(!ledger.is_shell_approved("ls -la", None));
        assert!(!ledger.is_shell_approved("ls", Some("/srv")));

        ledger.approve_shell("pwd", None);
        assert!(ledger.is_shell_approved("pwd", None));
        assert!(ledger.shell.contains("pwd\n"));
    }

    #[test]
    fn directory_grant_covers_descendants_only() {
        let tmp = tempfile::tempdir().unwrap();
        let granted = tmp.path().join("project");
        std::fs::create_dir(&granted).unwrap();

        let mut ledger = ApprovalLedger::default();
        ledger.approve_dir(&granted);
        ledger.approve_dir(&granted.join("."));
        assert_eq!(ledger.dirs.len(), 1);

        assert!(ledger.is_dir_approved(&granted));
        assert!(ledger.is_dir_approved(&granted.join("src/not-yet-created")));
        assert!(!ledger.is_dir_approved(tmp.path()));
        assert!(!ledger.is_dir_approved(&tmp.path().join("project-other")));
        assert!(!ledger.is_dir_approved(&granted.join("../elsewhere")));
    }

    #[test]
    fn recent_tool_calls_are_capped() {
        let mut agent = AgentState::new("gpt-4o-mini");
        for i in 0..60 {
            agent.record_tool_call(&ToolCall::new(format!("c{i}"), "list_dir", "{}"));
        }
        assert_eq!(agent.recent_tool_calls.len(), RECENT_TOOL_CALLS_MAX);
        assert_eq!(agent.recent_tool_calls[0].id, "c10");
        let last = agent.recent_tool_calls(3);
        assert_eq!(
            last.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["c57", "c58", "c59"]
        );
    }

    #[test]
    fn conversations_switch_and_list_active_first() {
        let mut agent = AgentState::new("gpt-4o-mini");
        let first = agent.active.clone();
        let second = agent.new_conversation("gpt-5.2");
        assert_eq!(agent.active, second);
        assert!(!agent.use_conversation("missing"));
        assert!(agent.use_conversation(&first));

        let listed = agent.list_conversations();
        assert_eq!(listed[0].0.id, first);
        assert!(listed[0].1);
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn system_prompt_is_prepended_once() {
        let mut conv = Conversation::new("abc", "gpt-4o-mini");
        conv.messages.push(ChatMessage::user("hi"));
        conv.ensure_system_prompt("be brief");
        conv.ensure_system_prompt("be brief");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0], ChatMessage::system("be brief"));
    }

    #[test]
    fn suspended_room_state_round_trips_through_json() {
        let mut state = RoomState::new(AgentName::Main, "gpt-4o-mini");
        state.agent_mut(AgentName::Meta, "gpt-4o-mini");
        state.approvals.approve_shell("make test", Some("/srv/app"));
        state.approvals.dirs.insert("/srv/app".to_string());
        state.plan = Some(PlanState {
            steps: vec!["build".to_string(), "test".to_string()],
            index: 1,
        });
        state.pending = Some(PendingApproval {
            request: ApprovalRequest::Shell {
                command: "make test".to_string(),
                workdir: None,
            },
            assistant: ChatMessage::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "run_shell", r#"{"command":"make test"}"#)],
            ),
            tool_calls: vec![ToolCall::new("c1", "run_shell", r#"{"command":"make test"}"#)],
            agent: AgentName::Main,
        });

        let json = serde_json::to_string(&state).unwrap();
        let back: RoomState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert!(json.contains(r#""kind":"shell""#));
    }
}
