//! WebSocket client for a running `yabot daemon`.

use crate::engine::TurnResult;
use crate::protocol::{ClientFrame, ServerFrame};
use anyhow::Result;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use yb_llm::TokenSink;

struct PendingRequest {
    reply: oneshot::Sender<ServerFrame>,
    tokens: Option<TokenSink>,
}

/// Requests in flight keyed by frame id.
type PendingMap = Arc<DashMap<String, PendingRequest>>;

pub struct RemoteClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl RemoteClient {
    #[tracing::instrument(level = "info")]
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("connect {url}: {e}"))?;
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingMap = Arc::new(DashMap::new());

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    tracing::warn!(error = %e, "daemon connection closed while sending");
                    break;
                }
            }
        });

        let inbound_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "daemon connection failed");
                        break;
                    }
                };
                match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(frame) => route_frame(&inbound_pending, frame),
                    Err(e) => tracing::warn!(error = %e, "daemon sent an invalid frame"),
                }
            }
            // Dropping the senders fails every waiter.
            inbound_pending.clear();
        });

        tracing::info!("connected to daemon");
        Ok(Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn request(&self, frame: ClientFrame, tokens: Option<TokenSink>) -> Result<ServerFrame> {
        let id = frame.id().to_string();
        let (reply, rx) = oneshot::channel();
        self.pending.insert(id.clone(), PendingRequest { reply, tokens });

        let payload = serde_json::to_string(&frame)?;
        if self.outbound.send(Message::Text(payload.into())).is_err() {
            self.pending.remove(&id);
            return Err(anyhow::anyhow!("daemon connection is closed"));
        }
        rx.await
            .map_err(|_| anyhow::anyhow!("daemon connection closed before reply to {id}"))
    }

    pub async fn invoke(&self, room_id: &str, text: &str, sink: Option<&TokenSink>) -> Result<TurnResult> {
        let frame = ClientFrame::Message {
            id: self.next_id(),
            room_id: room_id.to_string(),
            text: text.to_string(),
            stream: sink.is_some(),
        };
        match self.request(frame, sink.cloned()).await? {
            ServerFrame::Response { result, .. } => Ok(result),
            ServerFrame::Cancelled { .. } => Ok(TurnResult::cancelled(String::new(), String::new())),
            ServerFrame::Error { error, .. } => Err(anyhow::anyhow!(error)),
            other => Err(anyhow::anyhow!("unexpected reply frame: {other:?}")),
        }
    }

    pub async fn stop(&self, room_id: &str) -> Result<bool> {
        let frame = ClientFrame::Stop {
            id: self.next_id(),
            room_id: room_id.to_string(),
        };
        match self.request(frame, None).await? {
            ServerFrame::Stopped { ok, .. } => Ok(ok),
            ServerFrame::Error { error, .. } => Err(anyhow::anyhow!(error)),
            other => Err(anyhow::anyhow!("unexpected reply frame: {other:?}")),
        }
    }
}

fn route_frame(pending: &PendingMap, frame: ServerFrame) {
    if let ServerFrame::Token { id, text, .. } = &frame {
        if let Some(entry) = pending.get(id) {
            if let Some(tokens) = &entry.tokens {
                let _ = tokens.send(text.clone());
            }
        }
        return;
    }
    if frame.is_terminal() {
        match pending.remove(frame.id()) {
            Some((_, request)) => {
                let _ = request.reply.send(frame);
            }
            None => tracing::warn!(frame_id = %frame.id(), "reply for unknown request"),
        }
    }
}
