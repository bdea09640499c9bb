//! Matrix bridge: inbound room messages become engine turns, every
//! response string goes back as its own message.

use crate::commands;
use crate::config::MatrixConfig;
use crate::engine::{self, Engine, TurnResult, TurnStatus};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use yb_channels::{InboundKind, InboundMessage, Messenger};

const INBOUND_QUEUE: usize = 256;

pub struct MatrixBridge {
    engine: Engine,
    messenger: Arc<dyn Messenger>,
    bot_user_id: String,
    allowed_users: Vec<String>,
    auto_join: bool,
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MatrixBridge {
    pub fn new(engine: Engine, messenger: Arc<dyn Messenger>, cfg: &MatrixConfig) -> Self {
        Self {
            engine,
            messenger,
            bot_user_id: cfg.user_id.clone(),
            allowed_users: cfg.allowed_users.clone(),
            auto_join: cfg.auto_join,
            room_locks: DashMap::new(),
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
        self.messenger.start(tx).await?;
        tracing::info!(
            channel = self.messenger.channel_id(),
            user_id = %self.bot_user_id,
            allowed_users = self.allowed_users.len(),
            "matrix bridge started"
        );

        while let Some(msg) = rx.recv().await {
            let bridge = self.clone();
            tokio::spawn(async move { bridge.handle(msg).await });
        }
        tracing::warn!("matrix inbound channel closed");
        Ok(())
    }

    fn is_allowed(&self, sender: &str) -> bool {
        sender != self.bot_user_id
            && (self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == sender))
    }

    fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    async fn send(&self, room_id: &str, text: &str) {
        if let Err(e) = self.messenger.send_text(room_id, text).await {
            tracing::error!(room_id, error = %e, "matrix send failed");
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(room_id = %msg.room_id.as_str(), sender_id = %msg.sender_id.as_str(), kind = ?msg.kind)
    )]
    async fn handle(&self, msg: InboundMessage) {
        let room_id = msg.room_id.as_str();
        let sender = msg.sender_id.as_str();
        if !self.is_allowed(sender) {
            tracing::debug!("ignoring message from unlisted sender");
            return;
        }

        if msg.kind == InboundKind::Invite {
            if self.auto_join {
                match self.messenger.join_room(room_id).await {
                    Ok(()) => tracing::info!("joined room on invite"),
                    Err(e) => tracing::error!(error = %e, "failed to join room"),
                }
            }
            return;
        }

        let text = msg.content.trim();
        if text.is_empty() {
            return;
        }
        if commands::is_stop(text) {
            let stopped = self.engine.stop(room_id);
            self.send(room_id, commands::stop_response(stopped)).await;
            return;
        }

        if self.engine.is_running(room_id) {
            tracing::debug!("turn in flight for room; queuing");
        }
        let lock = self.room_lock(room_id);
        let _turn = lock.lock().await;

        let _ = self.messenger.set_typing(room_id, true).await;
        let result = self.engine.invoke(room_id, text).await;
        let _ = self.messenger.set_typing(room_id, false).await;

        for reply in bridge_replies(result) {
            self.send(room_id, &reply).await;
        }
    }
}

fn bridge_replies(result: engine::Result<TurnResult>) -> Vec<String> {
    match result {
        Ok(result) if result.status == TurnStatus::Cancelled => vec!["Cancelled.".to_string()],
        Ok(result) => result.responses,
        Err(e) => {
            tracing::error!(error = %e, "turn failed");
            vec![format!("Error: {e}")]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dispatch::ToolCatalog;
    use crate::engine::EngineSettings;
    use crate::skills::SkillCatalog;
    use crate::store::RoomStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use yb_channels::{EventId, RoomId, SenderId};
    use yb_llm::{ChatMessage, ChatModel, ChatResponse, ToolDefinition};

    struct FixedModel;

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> yb_llm::Result<ChatResponse> {
            Ok(ChatResponse::from_message(ChatMessage::assistant("first\n\nsecond")))
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: std::sync::Mutex<Vec<(String, String)>>,
        joined: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        fn channel_id(&self) -> &str {
            "matrix"
        }

        async fn start(&self, _tx: mpsc::Sender<InboundMessage>) -> Result<()> {
            Ok(())
        }

        async fn send_text(&self, room_id: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((room_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn join_room(&self, room_id: &str) -> Result<()> {
            self.joined.lock().unwrap().push(room_id.to_string());
            Ok(())
        }
    }

    fn inbound(kind: InboundKind, sender: &str, content: &str) -> InboundMessage {
        InboundMessage {
            kind,
            event_id: EventId::new("$e1"),
            room_id: RoomId::new("!r:example.org"),
            sender_id: SenderId::new(sender),
            content: content.to_string(),
            received_at: Utc::now(),
        }
    }

    fn bridge(allowed: Vec<String>) -> (MatrixBridge, Arc<RecordingMessenger>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            Arc::new(FixedModel),
            ToolCatalog::new(Vec::new(), SkillCatalog::default()),
            EngineSettings {
                workdir: tmp.path().to_path_buf(),
                ..EngineSettings::default()
            },
            RoomStore::open_in_memory().unwrap(),
        );
        let messenger = Arc::new(RecordingMessenger::default());
        let cfg = MatrixConfig {
            user_id: "@yabot:example.org".to_string(),
            allowed_users: allowed,
            ..MatrixConfig::default()
        };
        (MatrixBridge::new(engine, messenger.clone(), &cfg), messenger, tmp)
    }

    #[tokio::test]
    async fn each_response_is_its_own_message() {
        let (bridge, messenger, _tmp) = bridge(Vec::new());
        bridge.handle(inbound(InboundKind::Message, "@alice:example.org", "hi")).await;
        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                ("!r:example.org".to_string(), "first".to_string()),
                ("!r:example.org".to_string(), "second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn ignores_self_and_unlisted_senders() {
        let (bridge, messenger, _tmp) = bridge(vec!["@alice:example.org".to_string()]);
        bridge.handle(inbound(InboundKind::Message, "@yabot:example.org", "hi")).await;
        bridge.handle(inbound(InboundKind::Message, "@mallory:example.org", "hi")).await;
        assert!(messenger.sent.lock().unwrap().is_empty());

        bridge.handle(inbound(InboundKind::Invite, "@alice:example.org", "")).await;
        assert_eq!(*messenger.joined.lock().unwrap(), vec!["!r:example.org"]);
    }

    #[tokio::test]
    async fn stop_without_turn_reports_nothing_to_stop() {
        let (bridge, messenger, _tmp) = bridge(Vec::new());
        bridge.handle(inbound(InboundKind::Message, "@alice:example.org", "!stop")).await;
        assert_eq!(
            messenger.sent.lock().unwrap()[0].1,
            commands::NOTHING_TO_STOP
        );
    }

    #[test]
    fn failures_and_cancellations_have_fixed_replies() {
        assert_eq!(
            bridge_replies(Ok(TurnResult::cancelled("c".into(), "m".into()))),
            vec!["Cancelled."]
        );
        assert_eq!(
            bridge_replies(Err(engine::EngineError::Invariant("boom".into()))),
            vec!["Error: engine invariant violated: boom"]
        );
    }
}
