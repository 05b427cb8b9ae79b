#![forbid(unsafe_code)]

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Pass-through WebSocket proxy that logs sigrelay traffic.
#[derive(Parser, Debug)]
#[command(name = "sigrelay-tap", version, about)]
struct Cli {
    /// Address to accept client connections on
    #[arg(long, env = "TAP_LISTEN", default_value = "127.0.0.1:8081")]
    listen: SocketAddr,

    /// Relay WebSocket URL to forward to
    #[arg(long, env = "TAP_TARGET", default_value = "ws://127.0.0.1:8080")]
    target: String,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Console output always; with `log_file`, the same events are also
/// appended there without ANSI colours.
fn build_subscriber(
    verbose: u8,
    log_file: Option<&Path>,
) -> anyhow::Result<impl tracing::Subscriber + Send + Sync + 'static> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    build_subscriber(cli.verbose, cli.log_file.as_deref())?.init();

    sigrelay_tap::validate_target(&cli.target)?;

    // wss:// upstreams need a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let listener = TcpListener::bind(cli.listen).await?;
    info!("bound to {}", cli.listen);

    tokio::select! {
        result = sigrelay_tap::run(listener, cli.target) => result?,
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
    }

    Ok(())
}
