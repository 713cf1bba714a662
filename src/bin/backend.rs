#![forbid(unsafe_code)]

//! Serves the vidfetch API and the static frontend.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidfetch::{
    api::{self, AppState},
    config::{DEFAULT_CONFIG_PATH, load_settings_from},
};

const DEFAULT_LOG_FILTER: &str = "vidfetch=info,backend=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "backend", version, about = "HTTP façade over yt-dlp")]
struct Args {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Address to bind (overrides VIDFETCH_HOST)")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Port to bind (overrides VIDFETCH_PORT)")]
    port: Option<u16>,
    #[arg(long = "static-dir", value_name = "DIR", help = "Directory holding index.html and assets")]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings_from(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(static_dir) = args.static_dir {
        settings.static_dir = static_dir;
    }

    let state = AppState::from_settings(&settings);
    match state.extractor().version().await {
        Ok(version) => info!(%version, program = %settings.ytdlp_path.display(), "extractor available"),
        Err(err) => warn!(error = %err, "extractor unavailable; requests will fail until it is installed"),
    }

    let app = api::router(state, &settings.api_prefix);

    let addr = SocketAddr::new(
        settings
            .host
            .parse()
            .with_context(|| format!("parsing host {}", settings.host))?,
        settings.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, prefix = %settings.api_prefix, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}
