//! Game Session Server - Entry Point
//!
//! Loads settings, builds the server with the in-memory store, and serves
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use game_session_server::{MemoryStore, ServerBuilder, Settings};

#[derive(Parser, Debug)]
#[command(name = "game_session_server", version, about = "Real-time game session server")]
struct Args {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured bind address
    #[arg(long)]
    ip: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --debug, e.g. RUST_LOG=game_session_server=trace
    let default_level = if args.debug {
        "game_session_server=debug"
    } else {
        "game_session_server=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(ip) = args.ip {
        settings.ip = ip;
    }
    settings.validate()?;

    let server = ServerBuilder::new(settings)
        .persistence(Arc::new(MemoryStore::new()))
        .build();

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            if let Err(e) = stopper.shutdown() {
                error!(error = %e, "Shutdown failed");
            }
        }
    });

    info!(address = %server.settings().bind_address(), "Game session server starting");
    server.run().await?;
    info!("Game session server stopped");
    Ok(())
}
