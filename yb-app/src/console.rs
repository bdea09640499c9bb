//! Line-oriented console front end, in-process or against a daemon.

use crate::commands;
use crate::engine::{Engine, TurnResult, TurnStatus};
use crate::remote::RemoteClient;
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use yb_llm::TokenSink;

pub enum Backend {
    Local(Engine),
    Remote(RemoteClient),
}

impl Backend {
    async fn invoke(&self, room_id: &str, text: &str, sink: Option<&TokenSink>) -> Result<TurnResult> {
        match self {
            Backend::Local(engine) => Ok(match sink {
                Some(sink) => engine.invoke_stream(room_id, text, sink).await?,
                None => engine.invoke(room_id, text).await?,
            }),
            Backend::Remote(client) => client.invoke(room_id, text, sink).await,
        }
    }

    async fn stop(&self, room_id: &str) -> Result<bool> {
        match self {
            Backend::Local(engine) => Ok(engine.stop(room_id)),
            Backend::Remote(client) => client.stop(room_id).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub room_id: String,
    pub stream: bool,
}

/// Lines to print once a turn finishes. Streamed turns already printed
/// their text through the sink.
fn render_result(result: &TurnResult, streamed: bool) -> Vec<String> {
    if result.status == TurnStatus::Cancelled {
        return vec!["[cancelled]".to_string()];
    }
    if streamed {
        return Vec::new();
    }
    result.responses.clone()
}

async fn run_turn(backend: Arc<Backend>, room_id: String, text: String, stream: bool) {
    let result = if stream {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let printer = tokio::spawn(async move {
            let mut out = tokio::io::stdout();
            while let Some(token) = rx.recv().await {
                if out.write_all(token.as_bytes()).await.is_err() {
                    break;
                }
                let _ = out.flush().await;
            }
        });
        let result = backend.invoke(&room_id, &text, Some(&tx)).await;
        drop(tx);
        let _ = printer.await;
        println!();
        result
    } else {
        backend.invoke(&room_id, &text, None).await
    };

    match result {
        Ok(result) => {
            for line in render_result(&result, stream) {
                println!("{line}");
            }
        }
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "console turn failed");
            eprintln!("error: {e}");
        }
    }
}

#[tracing::instrument(level = "info", skip_all, fields(room_id = %opts.room_id, stream = opts.stream))]
pub async fn run(backend: Backend, opts: ConsoleOptions) -> Result<()> {
    let backend = Arc::new(backend);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<JoinHandle<()>> = None;

    println!(
        "yabot console (room `{}`). Type !help for commands, exit to quit.",
        opts.room_id
    );

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }
        if commands::is_stop(text) {
            let stopped = backend.stop(&opts.room_id).await?;
            println!("{}", commands::stop_response(stopped));
            continue;
        }

        // One turn per room at a time.
        if let Some(previous) = current.take() {
            if let Err(e) = previous.await {
                tracing::warn!(error = %e, "previous console turn panicked");
            }
        }
        current = Some(tokio::spawn(run_turn(
            backend.clone(),
            opts.room_id.clone(),
            text.to_string(),
            opts.stream,
        )));
    }

    if let Some(previous) = current.take() {
        let _ = previous.await;
    }
    Ok(())
}
