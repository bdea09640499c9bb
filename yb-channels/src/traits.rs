use crate::types::InboundMessage;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Unique channel identifier, e.g. "matrix".
    fn channel_id(&self) -> &str;

    /// Start receiving events. Pushes every inbound message or invite to `tx`.
    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()>;

    /// Send one plain-text message to a room.
    async fn send_text(&self, room_id: &str, text: &str) -> Result<()>;

    /// Accept an invite to `room_id`.
    async fn join_room(&self, room_id: &str) -> Result<()>;

    /// Send typing state updates where supported.
    async fn set_typing(&self, _room_id: &str, _active: bool) -> Result<()> {
        Ok(())
    }
}
