//! parley-server: WebSocket chat backend.
//!
//! Clients upload a request as START / PART / END frames, the server
//! reassembles it, runs a chat turn against the model backend and streams
//! the answer back as status events.

mod auth;
mod connection;
mod protocol;
mod reassembler;
mod server;
mod session;
mod startup;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_config::ParleyConfig;
use tokio::net::TcpListener;

use crate::server::{serve, spawn_reaper, ws_config};
use crate::startup::{build_from_env, StartupError};

const DEFAULT_LOG_LEVEL: &str = "parley=info";

#[derive(Parser)]
#[command(name = "parley-server", about = "WebSocket chat backend")]
struct Args {
    /// Config file. Defaults to `<config_dir>/parley/config.toml`.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `[server] listen`.
    #[arg(short, long)]
    listen: Option<String>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(fallback: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match parley_config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(args.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL));
            tracing::error!(error = %e, "Failed to load config");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(args.log_level.as_deref().unwrap_or(&config.logging.level));
    match args.config.as_deref() {
        Some(path) => tracing::info!(path = %path.display(), bots = config.bots.len(), "Loaded config"),
        None => tracing::info!(bots = config.bots.len(), "Loaded default config"),
    }

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "parley-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, config: ParleyConfig) -> Result<(), StartupError> {
    let state = Arc::new(build_from_env(&config)?);

    let addr = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(
        addr = %addr,
        max_frame_bytes = config.server.max_frame_bytes,
        session_ttl_secs = config.session.ttl_secs,
        "parley-server listening"
    );

    let reaper = spawn_reaper(
        state.reassembler.store().clone(),
        Duration::from_secs(config.session.reap_interval_secs),
    );

    tokio::select! {
        _ = serve(listener, state, ws_config(config.server.max_frame_bytes)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    reaper.abort();
    Ok(())
}
