use crate::traits::Messenger;
use crate::types::{InboundKind, InboundMessage};
use anyhow::{Result, anyhow};
use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Matrix client-server API adapter using a long-poll `/sync` loop.
#[derive(Clone)]
pub struct MatrixMessenger {
    http: reqwest::Client,
    homeserver_url: String,
    access_token: String,
    user_id: String,
    sync_timeout_ms: u64,
}

impl MatrixMessenger {
    pub fn new(homeserver_url: &str, access_token: &str, user_id: &str) -> Result<Self> {
        let homeserver_url = normalize_homeserver_url(homeserver_url)?;
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("matrix access token is required"));
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(anyhow!("matrix user id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            homeserver_url,
            access_token: access_token.to_string(),
            user_id: user_id.to_string(),
            sync_timeout_ms: 30_000,
        })
    }

    pub fn with_sync_timeout_ms(mut self, sync_timeout_ms: u64) -> Self {
        self.sync_timeout_ms = sync_timeout_ms.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.homeserver_url, path))
            .map_err(|e| anyhow!("invalid matrix API URL path {path:?}: {e}"))
    }

    async fn expect_success(response: reqwest::Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body: MatrixErrorResponse = response.json().await.unwrap_or_default();
        Err(anyhow!(
            "matrix {action} failed: status={} errcode={} error={}",
            status,
            body.errcode.unwrap_or_else(|| "unknown".to_string()),
            body.error.unwrap_or_else(|| "unknown".to_string())
        ))
    }
}

#[async_trait::async_trait]
impl Messenger for MatrixMessenger {
    fn channel_id(&self) -> &str {
        "matrix"
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(error) = adapter.run_sync_loop(tx).await {
                tracing::error!(%error, "matrix sync loop exited");
            }
        });
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(room_id = %room_id))]
    async fn send_text(&self, room_id: &str, text: &str) -> Result<()> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(anyhow!("matrix room id is required"));
        }
        if text.trim().is_empty() {
            return Err(anyhow!("message content is empty"));
        }

        let txn_id = Uuid::new_v4().to_string();
        let url = self.api_url(&format!(
            "/_matrix/client/v3/rooms/{room_id}/send/m.room.message/{txn_id}"
        ))?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "msgtype": "m.text", "body": text }))
            .send()
            .await?;
        Self::expect_success(response, "send").await
    }

    #[tracing::instrument(level = "info", skip_all, fields(room_id = %room_id))]
    async fn join_room(&self, room_id: &str) -> Result<()> {
        let url = self.api_url(&format!("/_matrix/client/v3/join/{room_id}"))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::expect_success(response, "join").await
    }

    async fn set_typing(&self, room_id: &str, active: bool) -> Result<()> {
        let url = self.api_url(&format!(
            "/_matrix/client/v3/rooms/{room_id}/typing/{}",
            self.user_id
        ))?;
        let mut payload = serde_json::json!({ "typing": active });
        if active {
            payload["timeout"] = serde_json::json!(30_000);
        }
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        Self::expect_success(response, "typing").await
    }
}

impl MatrixMessenger {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run_sync_loop(&self, tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        // Skip backlog: only events after startup are answered.
        let mut since_token = self.sync_with_retry(None).await.next_batch;
        tracing::info!("matrix messenger seeded initial sync token");

        loop {
            let sync = self.sync_with_retry(Some(&since_token)).await;
            let inbound = collect_inbound(&sync, &self.user_id);
            let emitted = inbound.len();
            for message in inbound {
                tx.send(message)
                    .await
                    .map_err(|e| anyhow!("matrix inbound queue closed: {e}"))?;
            }
            since_token = sync.next_batch;
            tracing::debug!(emitted, "matrix sync cycle complete");
        }
    }

    async fn sync_with_retry(&self, since: Option<&str>) -> MatrixSyncResponse {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.sync_once(since).await {
                Ok(sync) => return sync,
                Err(error) => {
                    tracing::warn!(%error, backoff_secs = backoff.as_secs(), "matrix sync failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                }
            }
        }
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<MatrixSyncResponse> {
        let url = self.api_url("/_matrix/client/v3/sync")?;
        let timeout = if since.is_some() {
            self.sync_timeout_ms.to_string()
        } else {
            "0".to_string()
        };
        let mut request = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("timeout", timeout.as_str())]);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("matrix sync failed: status={status} body={body}"));
        }
        Ok(response.json().await?)
    }
}

fn collect_inbound(sync: &MatrixSyncResponse, self_user_id: &str) -> Vec<InboundMessage> {
    let mut out = Vec::new();

    for (room_id, invited) in &sync.rooms.invite {
        let inviter = invited
            .invite_state
            .events
            .iter()
            .find(|e| {
                e.event_type == "m.room.member"
                    && e.state_key.as_deref() == Some(self_user_id)
                    && e.content.get("membership").and_then(|m| m.as_str()) == Some("invite")
            })
            .and_then(|e| e.sender.clone());
        let Some(inviter) = inviter else {
            continue;
        };
        out.push(InboundMessage {
            kind: InboundKind::Invite,
            event_id: format!("invite:{room_id}").into(),
            room_id: room_id.clone().into(),
            sender_id: inviter.into(),
            content: String::new(),
            received_at: Utc::now(),
        });
    }

    for (room_id, joined) in &sync.rooms.join {
        for event in &joined.timeline.events {
            if !should_emit_matrix_event(event, self_user_id) {
                continue;
            }
            let (Some(event_id), Some(sender)) = (event.event_id.as_deref(), event.sender.as_deref())
            else {
                continue;
            };
            let Some(body) = extract_matrix_message_body(&event.content) else {
                continue;
            };
            out.push(InboundMessage {
                kind: InboundKind::Message,
                event_id: event_id.into(),
                room_id: room_id.clone().into(),
                sender_id: sender.into(),
                content: body,
                received_at: Utc::now(),
            });
        }
    }

    out
}

fn normalize_homeserver_url(raw: &str) -> Result<String> {
    let normalized = raw.trim().trim_end_matches('/').to_string();
    if normalized.is_empty() {
        return Err(anyhow!("matrix homeserver URL is required"));
    }
    let parsed =
        Url::parse(&normalized).map_err(|e| anyhow!("invalid matrix homeserver URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(normalized),
        other => Err(anyhow!(
            "invalid matrix homeserver URL scheme: {other} (expected http or https)"
        )),
    }
}

fn extract_matrix_message_body(content: &serde_json::Value) -> Option<String> {
    if content.get("msgtype").and_then(|t| t.as_str()) != Some("m.text") {
        return None;
    }
    let body = content.get("body")?.as_str()?.trim();
    if body.is_empty() {
        return None;
    }
    Some(body.to_string())
}

fn should_emit_matrix_event(event: &MatrixEvent, self_user_id: &str) -> bool {
    let Some(sender) = event.sender.as_deref() else {
        return false;
    };
    !sender.eq_ignore_ascii_case(self_user_id) && event.event_type == "m.room.message"
}

#[derive(Debug, Deserialize)]
struct MatrixSyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: MatrixSyncRooms,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixSyncRooms {
    #[serde(default)]
    join: HashMap<String, MatrixJoinedRoom>,
    #[serde(default)]
    invite: HashMap<String, MatrixInvitedRoom>,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixJoinedRoom {
    #[serde(default)]
    timeline: MatrixEventList,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixInvitedRoom {
    #[serde(default)]
    invite_state: MatrixEventList,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixEventList {
    #[serde(default)]
    events: Vec<MatrixEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct MatrixEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    state_key: Option<String>,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct MatrixErrorResponse {
    #[serde(default)]
    errcode: Option<String>,
    #[serde(default)]
    error: Option<String>,
}
