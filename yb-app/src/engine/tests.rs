use super::*;
use crate::skills::SkillCatalog;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use yb_llm::{ChatResponse, LlmError, Role, ToolCall, ToolDefinition};
use yb_tools::{CreateDirTool, ListDirTool, ReadFileTool, ShellTool, Tool, WriteFileTool};

const ROOM: &str = "!room:example.org";

#[derive(Debug, Clone)]
struct Recorded {
    messages: Vec<ChatMessage>,
    tools: Vec<String>,
}

/// Returns queued assistant messages in order and records every request.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedModel {
    fn new(replies: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, reply: ChatMessage) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn last_request(&self) -> Recorded {
        self.requests().pop().expect("no request recorded")
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> yb_llm::Result<ChatResponse> {
        self.requests.lock().unwrap().push(Recorded {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Http("script exhausted".to_string()))?;
        Ok(ChatResponse::from_message(reply))
    }
}

/// Answers immediately, but first stops the room's turn through the engine.
#[derive(Default)]
struct StoppingModel {
    engine: std::sync::OnceLock<Engine>,
}

#[async_trait]
impl ChatModel for StoppingModel {
    async fn complete(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> yb_llm::Result<ChatResponse> {
        if let Some(engine) = self.engine.get() {
            assert!(engine.stop(ROOM));
        }
        Ok(ChatResponse::from_message(ChatMessage::assistant("too late")))
    }
}

/// Signals once a request arrives, then never answers.
struct HangingModel {
    started: tokio::sync::Notify,
}

#[async_trait]
impl ChatModel for HangingModel {
    async fn complete(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> yb_llm::Result<ChatResponse> {
        self.started.notify_one();
        std::future::pending().await
    }
}

fn settings(workdir: &Path) -> EngineSettings {
    EngineSettings {
        workdir: workdir.to_path_buf(),
        ..EngineSettings::default()
    }
}

fn engine_with(llm: Arc<dyn ChatModel>, workdir: &Path) -> Engine {
    engine_with_skills(llm, workdir, SkillCatalog::default())
}

fn engine_with_skills(llm: Arc<dyn ChatModel>, workdir: &Path, skills: SkillCatalog) -> Engine {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ListDirTool),
        Arc::new(ReadFileTool::new(8000)),
        Arc::new(WriteFileTool),
        Arc::new(CreateDirTool),
        Arc::new(ShellTool::new(Duration::from_secs(10), 8000)),
    ];
    Engine::new(
        llm,
        ToolCatalog::new(tools, skills),
        settings(workdir),
        RoomStore::open_in_memory().unwrap(),
    )
}

fn call(id: &str, name: &str, args: serde_json::Value) -> ChatMessage {
    ChatMessage::assistant_with_tool_calls("", vec![ToolCall::new(id, name, args.to_string())])
}

fn tool_messages(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
    messages.iter().filter(|m| m.role == Role::Tool).collect()
}

async fn load(engine: &Engine) -> RoomState {
    engine.store.load(ROOM).await.unwrap().expect("room saved")
}

#[tokio::test]
async fn plain_answer_is_split_and_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![ChatMessage::assistant("Hello.\n\nWorld")]);
    let engine = engine_with(model.clone(), tmp.path());

    let result = engine.invoke(ROOM, "hi there").await.unwrap();
    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.responses, vec!["Hello.", "World"]);
    assert_eq!(result.model, "gpt-4o-mini");
    assert!(result.tool_notices.is_empty());

    let state = load(&engine).await;
    assert_eq!(result.active_conversation, state.active_summary().0);
    let messages = &state.agents[&AgentName::Main]
        .active_conversation()
        .unwrap()
        .messages;
    assert_eq!(
        messages.iter().map(|m| m.role).collect::<Vec<_>>(),
        vec![Role::System, Role::User, Role::Assistant]
    );
    assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
    assert!(model.last_request().tools.contains(&"ask_user".to_string()));
}

#[tokio::test]
async fn shell_approval_is_remembered() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = tmp.path().display().to_string();
    let args = json!({ "command": "echo hi", "workdir": workdir });
    let model = ScriptedModel::new(vec![call("c1", "run_shell", args.clone())]);
    let engine = engine_with(model.clone(), tmp.path());

    let first = engine.invoke(ROOM, "please run it").await.unwrap();
    assert_eq!(first.status, TurnStatus::Suspended);
    assert_eq!(
        first.responses,
        vec![
            format!("[system] Tool call: run_shell {args}"),
            format!("Approve running shell command: `echo hi` (workdir: {workdir})? Reply `y` to allow."),
        ]
    );
    let state = load(&engine).await;
    assert!(state.pending.is_some());
    assert!(!state.approvals.is_shell_approved("echo hi", Some(&workdir)));

    model.push(ChatMessage::assistant("done"));
    let second = engine.invoke(ROOM, " Y ").await.unwrap();
    assert_eq!(second.status, TurnStatus::Completed);
    assert_eq!(second.responses.last().map(String::as_str), Some("done"));
    let executed = model.last_request();
    let tools = tool_messages(&executed.messages);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("c1"));
    assert!(tools[0].content.contains("hi"));

    let state = load(&engine).await;
    assert!(state.pending.is_none());
    assert!(state.approvals.is_shell_approved("echo hi", Some(&workdir)));

    model.push(call("c2", "run_shell", args));
    model.push(ChatMessage::assistant("ok"));
    let third = engine.invoke(ROOM, "run it once more").await.unwrap();
    assert_eq!(third.status, TurnStatus::Completed);
    assert_eq!(third.responses.len(), 2);
    assert_eq!(third.responses[1], "ok");
    assert!(!third.responses.iter().any(|r| r.starts_with("Approve")));
}

#[tokio::test]
async fn directory_approval_covers_descendants() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let nested = root.join("a/b.txt").display().to_string();
    let model = ScriptedModel::new(vec![call(
        "l1",
        "list_dir",
        json!({ "path": root.display().to_string() }),
    )]);
    let engine = engine_with(model.clone(), tmp.path());

    let first = engine.invoke(ROOM, "look around").await.unwrap();
    assert_eq!(
        first.responses.last().unwrap(),
        &format!(
            "Approve access to directory `{}` (includes descendants)? Reply `y` to allow.",
            root.display()
        )
    );

    model.push(call("r1", "read_file", json!({ "path": nested })));
    model.push(ChatMessage::assistant("missing file"));
    let second = engine.invoke(ROOM, "y").await.unwrap();
    assert_eq!(second.status, TurnStatus::Completed);
    assert_eq!(second.responses.last().map(String::as_str), Some("missing file"));
    assert!(!second.responses.iter().any(|r| r.starts_with("Approve")));
    assert_eq!(tool_messages(&model.last_request().messages).len(), 2);
}

#[tokio::test]
async fn denial_feeds_back_without_executing() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("marker");
    let model = ScriptedModel::new(vec![ChatMessage::assistant_with_tool_calls(
        "I will create the marker.",
        vec![ToolCall::new(
            "c1",
            "run_shell",
            json!({ "command": format!("touch {}", marker.display()) }).to_string(),
        )],
    )]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "make a marker").await.unwrap();
    model.push(ChatMessage::assistant("Understood."));
    let result = engine.invoke(ROOM, "no, use ls").await.unwrap();

    assert_eq!(result.responses, vec!["Understood."]);
    assert!(!marker.exists());
    let request = model.last_request();
    assert!(tool_messages(&request.messages).is_empty());
    let tail: Vec<_> = request.messages.iter().rev().take(2).collect();
    assert_eq!(tail[0], &ChatMessage::user("Approval denied. Feedback: no, use ls"));
    assert_eq!(tail[1], &ChatMessage::assistant("I will create the marker."));
    assert!(load(&engine).await.pending.is_none());
}

#[tokio::test]
async fn clarification_answer_becomes_tool_result() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![call("q1", "ask_user", json!({ "question": "Which file?" }))]);
    let engine = engine_with(model.clone(), tmp.path());

    let first = engine.invoke(ROOM, "fix the bug").await.unwrap();
    assert_eq!(first.status, TurnStatus::Suspended);
    assert_eq!(first.responses.last().map(String::as_str), Some("Which file?"));

    model.push(ChatMessage::assistant("thanks"));
    let second = engine.invoke(ROOM, "main.rs").await.unwrap();
    assert_eq!(second.responses, vec!["thanks"]);
    let request = model.last_request();
    let n = request.messages.len();
    assert!(request.messages[n - 2].has_tool_calls());
    assert_eq!(request.messages[n - 1], ChatMessage::tool("q1", "main.rs"));
}

#[tokio::test]
async fn plan_suspends_on_step_and_resumes_at_same_index() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("- list files\n- run tests"),
        ChatMessage::assistant("Listed."),
        call("s1", "run_shell", json!({ "command": "echo ok" })),
    ]);
    let engine = engine_with(model.clone(), tmp.path());

    let first = engine
        .invoke(ROOM, "inspect the repo and then run the tests")
        .await
        .unwrap();
    assert_eq!(first.status, TurnStatus::Suspended);
    assert_eq!(
        first.responses,
        vec![
            "Plan:\n- list files\n- run tests".to_string(),
            "[system] Step 1/2: list files".to_string(),
            "Listed.".to_string(),
            "[system] Step 2/2: run tests".to_string(),
            format!("[system] Tool call: run_shell {}", json!({ "command": "echo ok" })),
            "Approve running shell command: `echo ok`? Reply `y` to allow.".to_string(),
        ]
    );
    assert!(model.requests()[0].tools.is_empty());
    let state = load(&engine).await;
    assert_eq!(state.plan.as_ref().map(|p| p.index), Some(1));

    model.push(ChatMessage::assistant("Tests pass."));
    let second = engine.invoke(ROOM, "y").await.unwrap();
    assert_eq!(second.status, TurnStatus::Completed);
    assert_eq!(second.responses.last().map(String::as_str), Some("Tests pass."));
    assert!(!second.responses.iter().any(|r| r.starts_with("[system] Step")));
    assert!(load(&engine).await.plan.is_none());
}

#[tokio::test]
async fn commands_never_reach_the_model() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(Vec::new());
    let engine = engine_with(model.clone(), tmp.path());

    let result = engine.invoke(ROOM, "!model gpt-5.2").await.unwrap();
    assert_eq!(
        result.responses,
        vec!["Model set to `gpt-5.2` for this room's active conversation."]
    );
    assert_eq!(result.model, "gpt-5.2");
    assert!(model.requests().is_empty());
    let state = load(&engine).await;
    assert!(state.agents[&AgentName::Main]
        .active_conversation()
        .unwrap()
        .messages
        .is_empty());
}

#[tokio::test]
async fn pending_approval_takes_precedence_over_commands() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![call("c1", "run_shell", json!({ "command": "ls" }))]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "list it").await.unwrap();
    model.push(ChatMessage::assistant("ok"));
    let result = engine.invoke(ROOM, "!new").await.unwrap();
    assert_eq!(result.responses, vec!["ok"]);
    let request = model.last_request();
    assert_eq!(
        request.messages.last(),
        Some(&ChatMessage::user("Approval denied. Feedback: !new"))
    );
}

#[tokio::test]
async fn stop_cancels_in_flight_turn_without_saving() {
    let tmp = tempfile::tempdir().unwrap();
    let model = Arc::new(HangingModel {
        started: tokio::sync::Notify::new(),
    });
    let engine = engine_with(model.clone(), tmp.path());

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.invoke(ROOM, "hello").await })
    };
    model.started.notified().await;

    let stop = engine.invoke(ROOM, "!stop").await.unwrap();
    assert_eq!(stop.responses, vec![commands::STOPPING]);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, TurnStatus::Cancelled);
    assert!(result.responses.is_empty());
    assert!(engine.store.load(ROOM).await.unwrap().is_none());
    assert!(!engine.stop(ROOM));
}

#[tokio::test]
async fn llm_failure_leaves_room_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(Vec::new());
    let engine = engine_with(model, tmp.path());

    let err = engine.invoke(ROOM, "hello").await.unwrap_err();
    assert!(matches!(err, EngineError::Llm(_)));
    assert!(engine.store.load(ROOM).await.unwrap().is_none());
}

#[tokio::test]
async fn rejects_empty_input() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(ScriptedModel::new(Vec::new()), tmp.path());
    assert!(matches!(
        engine.invoke("  ", "hello").await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.invoke(ROOM, "   ").await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn unknown_tool_is_an_invariant_violation() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![call("x1", "format_disk", json!({}))]);
    let engine = engine_with(model, tmp.path());

    let err = engine.invoke(ROOM, "go").await.unwrap_err();
    assert!(matches!(err, EngineError::Invariant(_)));
    assert!(engine.store.load(ROOM).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_arguments_become_error_results() {
    let tmp = tempfile::tempdir().unwrap();
    // Unparseable `list_dir` arguments carry no path, so nothing needs approval.
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant_with_tool_calls("", vec![ToolCall::new("b1", "list_dir", "{oops")]),
        ChatMessage::assistant(""),
    ]);
    let engine = engine_with(model.clone(), tmp.path());

    let result = engine.invoke(ROOM, "go").await.unwrap();
    assert_eq!(result.responses.last().map(String::as_str), Some(dispatch::NO_OUTPUT));
    let request = model.last_request();
    let tools = tool_messages(&request.messages);
    assert_eq!(tools.len(), 1);
    assert!(tools[0].content.starts_with("ERROR: invalid JSON arguments:"));
}

#[tokio::test]
async fn streaming_forwards_tokens_and_prompts() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![ChatMessage::assistant("streamed answer")]);
    let engine = engine_with(model, tmp.path());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let result = engine.invoke_stream(ROOM, "hello", &tx).await.unwrap();
    drop(tx);
    let mut streamed = String::new();
    while let Some(token) = rx.recv().await {
        streamed.push_str(&token);
    }
    assert_eq!(result.responses, vec!["streamed answer"]);
    assert_eq!(streamed, "streamed answer");
}

#[tokio::test]
async fn workdir_instructions_are_injected_once() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("AGENTS.md"), "Run cargo fmt first.").unwrap();
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("one"),
        ChatMessage::assistant("two"),
    ]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "first").await.unwrap();
    engine.invoke(ROOM, "second").await.unwrap();

    let injected = |r: &Recorded| {
        r.messages
            .iter()
            .filter(|m| m.role == Role::System && m.content.contains("Run cargo fmt first."))
            .count()
    };
    let requests = model.requests();
    assert_eq!(injected(&requests[0]), 1);
    assert_eq!(injected(&requests[1]), 1);
    assert!(requests[0].messages[1]
        .content
        .starts_with("AGENTS.md instructions from "));
}

#[tokio::test]
async fn meta_agent_changes_main_model() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        call("m1", "agent_set_model", json!({ "agent": "main", "model": "gpt-5.2" })),
        ChatMessage::assistant("switched"),
    ]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "!become meta").await.unwrap();
    let result = engine.invoke(ROOM, "use the bigger model for main").await.unwrap();
    assert_eq!(result.responses.last().map(String::as_str), Some("switched"));
    assert_eq!(
        model.requests()[0].tools,
        vec!["agent_ask", "agent_set_model", "agent_recent_tool_calls"]
    );

    let state = load(&engine).await;
    assert_eq!(state.active_agent, AgentName::Meta);
    assert_eq!(
        state.agents[&AgentName::Main].active_conversation().unwrap().model,
        "gpt-5.2"
    );
    assert_eq!(
        state.agents[&AgentName::Meta].recent_tool_calls(10)[0].name,
        "agent_set_model"
    );
}

#[tokio::test]
async fn stop_racing_a_finished_turn_saves_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let model = Arc::new(StoppingModel::default());
    let engine = engine_with(model.clone(), tmp.path());
    assert!(model.engine.set(engine.clone()).is_ok());

    let result = engine.invoke(ROOM, "hello").await.unwrap();
    assert_eq!(result.status, TurnStatus::Cancelled);
    assert!(result.responses.is_empty());
    assert!(engine.store.load(ROOM).await.unwrap().is_none());
    assert!(!engine.is_running(ROOM));
}

#[tokio::test]
async fn agent_ask_folds_answer_back_as_tool_result() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        call("a1", "agent_ask", json!({ "agent": "main", "text": "What changed?" })),
        ChatMessage::assistant("Only the README."),
        ChatMessage::assistant("Main says only the README changed."),
    ]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "!become meta").await.unwrap();
    let result = engine.invoke(ROOM, "ask main what changed").await.unwrap();
    assert_eq!(result.responses.last().map(String::as_str), Some("Main says only the README changed."));

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].tools.is_empty());
    assert_eq!(requests[1].messages.last(), Some(&ChatMessage::user("What changed?")));
    assert_eq!(
        requests[2].messages.last(),
        Some(&ChatMessage::tool("a1", "Only the README."))
    );

    let state = load(&engine).await;
    let main = &state.agents[&AgentName::Main].active_conversation().unwrap().messages;
    assert_eq!(
        main.iter().map(|m| m.role).collect::<Vec<_>>(),
        vec![Role::System, Role::User, Role::Assistant]
    );
    assert_eq!(main[2], ChatMessage::assistant("Only the README."));
}

#[tokio::test]
async fn skill_instructions_follow_the_tool_results() {
    let tmp = tempfile::tempdir().unwrap();
    let skills = SkillCatalog::new(vec![crate::skills::Skill {
        name: "Deploy".to_string(),
        description: "Deploy the service".to_string(),
        content: "Run make deploy.".to_string(),
        tool_name: "skill__deploy".to_string(),
        source: tmp.path().join("deploy.md"),
    }]);
    let model = ScriptedModel::new(vec![
        call("k1", "skill__deploy", json!({})),
        ChatMessage::assistant("Deploying."),
    ]);
    let engine = engine_with_skills(model.clone(), tmp.path(), skills);

    let result = engine.invoke(ROOM, "ship it").await.unwrap();
    assert_eq!(result.status, TurnStatus::Completed);
    assert_eq!(result.responses.last().map(String::as_str), Some("Deploying."));
    assert!(model.requests()[0].tools.contains(&"skill__deploy".to_string()));

    let request = model.last_request();
    let n = request.messages.len();
    assert!(request.messages[n - 3].has_tool_calls());
    assert_eq!(request.messages[n - 2], ChatMessage::tool("k1", "Skill applied: Deploy"));
    assert_eq!(
        request.messages[n - 1],
        ChatMessage::system("Skill `Deploy` instructions:\nRun make deploy.")
    );
}

#[tokio::test]
async fn failing_shell_command_surfaces_a_notice() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![call(
        "f1",
        "run_shell",
        json!({ "command": "echo broken >&2; exit 3" }),
    )]);
    let engine = engine_with(model.clone(), tmp.path());

    engine.invoke(ROOM, "run the broken thing").await.unwrap();
    model.push(ChatMessage::assistant("It exited with 3."));
    let result = engine.invoke(ROOM, "y").await.unwrap();

    let notice = "[system] Shell command failed (exit 3): broken".to_string();
    assert_eq!(result.tool_notices, vec![notice.clone()]);
    assert_eq!(result.responses, vec![notice, "It exited with 3.".to_string()]);
    let tools = tool_messages(&model.last_request().messages).len();
    assert_eq!(tools, 1);
}

#[tokio::test]
async fn replayed_batches_do_not_repeat_call_notices() {
    let tmp = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![ChatMessage::assistant_with_tool_calls(
        "",
        vec![
            ToolCall::new("p1", "run_shell", json!({ "command": "echo one" }).to_string()),
            ToolCall::new("p2", "run_shell", json!({ "command": "echo two" }).to_string()),
        ],
    )]);
    let engine = engine_with(model.clone(), tmp.path());
    let is_call_notice = |line: &String| line.starts_with("[system] Tool call:");

    let first = engine.invoke(ROOM, "run both").await.unwrap();
    assert_eq!(first.tool_notices.iter().filter(|n| is_call_notice(n)).count(), 2);
    assert_eq!(
        first.responses.last().map(String::as_str),
        Some("Approve running shell command: `echo one`? Reply `y` to allow.")
    );

    let second = engine.invoke(ROOM, "y").await.unwrap();
    assert_eq!(second.status, TurnStatus::Suspended);
    assert!(second.tool_notices.is_empty());
    assert_eq!(
        second.responses,
        vec!["Approve running shell command: `echo two`? Reply `y` to allow."]
    );

    model.push(ChatMessage::assistant("both ran"));
    let third = engine.invoke(ROOM, "y").await.unwrap();
    assert_eq!(third.status, TurnStatus::Completed);
    assert!(!third.responses.iter().any(is_call_notice));
    assert_eq!(third.responses, vec!["both ran"]);
    assert_eq!(tool_messages(&model.last_request().messages).len(), 2);
}
