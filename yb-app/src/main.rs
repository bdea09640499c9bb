//! yabot main binary.

mod app;
mod bridge;
mod commands;
mod config;
mod console;
mod daemon;
mod engine;
mod protocol;
mod remote;
mod skills;
mod store;
mod streams;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "yabot", version, about = "Coding-first chat assistant")]
struct Cli {
    /// Config file (default: ~/.yabot/config.toml).
    #[arg(long, global = true, env = "YABOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive console (default).
    Chat {
        #[arg(long, default_value = "console")]
        room: String,
        /// Daemon WebSocket URL, e.g. ws://127.0.0.1:8765/ws.
        #[arg(long)]
        remote: Option<String>,
        #[arg(long)]
        no_stream: bool,
    },
    /// Serve the engine over WebSocket.
    Daemon,
    /// Bridge Matrix rooms to the engine.
    Matrix,
    /// Validate config, store and skills.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let cfg = config::YabotConfig::load(cli.config).await?;

    let command = cli.command.unwrap_or(Command::Chat {
        room: "console".to_string(),
        remote: None,
        no_stream: false,
    });

    match command {
        Command::Chat {
            room,
            remote,
            no_stream,
        } => {
            let backend = match remote {
                Some(url) => console::Backend::Remote(remote::RemoteClient::connect(&url).await?),
                None => console::Backend::Local(app::build_engine(&cfg)?),
            };
            console::run(
                backend,
                console::ConsoleOptions {
                    room_id: room,
                    stream: !no_stream,
                },
            )
            .await
        }
        Command::Daemon => {
            let engine = app::build_engine(&cfg)?;
            let addr: SocketAddr = format!("{}:{}", cfg.daemon.host, cfg.daemon.port)
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid daemon address: {e}"))?;
            daemon::serve(engine, addr).await
        }
        Command::Matrix => {
            if cfg.matrix.access_token.trim().is_empty() || cfg.matrix.user_id.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "matrix.access_token and matrix.user_id are required (or MATRIX_ACCESS_TOKEN / MATRIX_USER_ID)"
                ));
            }
            let engine = app::build_engine(&cfg)?;
            let messenger = yb_channels::MatrixMessenger::new(
                &cfg.matrix.homeserver,
                &cfg.matrix.access_token,
                &cfg.matrix.user_id,
            )?
            .with_sync_timeout_ms(cfg.matrix.sync_timeout_ms);
            let bridge = Arc::new(bridge::MatrixBridge::new(
                engine,
                Arc::new(messenger),
                &cfg.matrix,
            ));
            bridge.run().await
        }
        Command::Doctor => app::doctor(&cfg).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "yabot=info,yb_llm=info,yb_tools=info,yb_channels=info,tower_http=info",
        ),
    };
    let log_format = std::env::var("YABOT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr so console output stays readable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported YABOT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_flags_parse() {
        let cli = Cli::try_parse_from([
            "yabot",
            "--config",
            "/tmp/yabot.toml",
            "chat",
            "--room",
            "work",
            "--remote",
            "ws://127.0.0.1:8765/ws",
            "--no-stream",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/yabot.toml")));
        match cli.command {
            Some(Command::Chat {
                room,
                remote,
                no_stream,
            }) => {
                assert_eq!(room, "work");
                assert_eq!(remote.as_deref(), Some("ws://127.0.0.1:8765/ws"));
                assert!(no_stream);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["yabot"]).unwrap().command.is_none());
    }

    #[test]
    fn panic_payloads_are_stringified() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(payload.as_ref()), "boom");
    }
}
