//! WebSocket daemon: serves the engine to remote consoles.

use crate::engine::{self, Engine, TurnResult, TurnStatus};
use crate::protocol::{ClientFrame, ServerFrame};
use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::trace::TraceLayer;

pub fn router(engine: Engine) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(|response: &Response, latency: Duration, _span: &tracing::Span| {
            tracing::info!(
                status = response.status().as_u16(),
                latency_ms = latency.as_millis() as u64,
                "http request completed"
            );
        })
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(trace_layer)
        .with_state(engine)
}

pub async fn serve(engine: Engine, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;
    tracing::info!(%addr, "yabot daemon serving");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("yabot daemon shutdown completed");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(engine): State<Engine>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(engine, socket))
}

#[tracing::instrument(level = "info", skip_all)]
async fn handle_socket(engine: Engine, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let payload = match serde_json::to_string(&frame) {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode server frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "daemon received invalid frame");
                let _ = outbound_tx.send(ServerFrame::Error {
                    id: String::new(),
                    room_id: String::new(),
                    error: format!("invalid frame: {e}"),
                });
                continue;
            }
        };
        tracing::debug!(frame_id = %frame.id(), "client frame received");

        match frame {
            ClientFrame::Stop { id, room_id } => {
                let ok = engine.stop(&room_id);
                let _ = outbound_tx.send(ServerFrame::Stopped { id, room_id, ok });
            }
            ClientFrame::Message {
                id,
                room_id,
                text,
                stream,
            } => {
                // Each turn runs on its own task so a later `stop` frame is read promptly.
                let engine = engine.clone();
                let outbound_tx = outbound_tx.clone();
                tokio::spawn(async move {
                    let frame = run_message(&engine, &outbound_tx, id, room_id, &text, stream).await;
                    let _ = outbound_tx.send(frame);
                });
            }
        }
    }

    drop(outbound_tx);
    if let Err(e) = outbound_task.await {
        tracing::warn!(error = %e, "daemon outbound task ended abnormally");
    }
}

async fn run_message(
    engine: &Engine,
    outbound: &mpsc::UnboundedSender<ServerFrame>,
    id: String,
    room_id: String,
    text: &str,
    stream: bool,
) -> ServerFrame {
    let result = if stream {
        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
        let forward = {
            let outbound = outbound.clone();
            let id = id.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                while let Some(text) = token_rx.recv().await {
                    let frame = ServerFrame::Token {
                        id: id.clone(),
                        room_id: room_id.clone(),
                        text,
                    };
                    if outbound.send(frame).is_err() {
                        break;
                    }
                }
            })
        };
        let result = engine.invoke_stream(&room_id, text, &token_tx).await;
        drop(token_tx);
        let _ = forward.await;
        result
    } else {
        engine.invoke(&room_id, text).await
    };

    response_frame(id, room_id, result)
}

fn response_frame(id: String, room_id: String, result: engine::Result<TurnResult>) -> ServerFrame {
    match result {
        Ok(result) if result.status == TurnStatus::Cancelled => ServerFrame::Cancelled { id, room_id },
        Ok(result) => ServerFrame::Response { id, room_id, result },
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "turn failed");
            ServerFrame::Error {
                id,
                room_id,
                error: e.to_string(),
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}
