#![forbid(unsafe_code)]

//! HTTP server exposing the metadata and download endpoints.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubefetch::{
    config::{self, DEFAULT_CONFIG_PATH, ServerConfig},
    mux::Muxer,
    routes::{AppState, router},
    security::ensure_not_root,
    ytdlp::YtDlp,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch video metadata and stream downloads over HTTP.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the env-style config file"
    )]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Address to bind (overrides TUBEFETCH_HOST)")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Port to bind (overrides TUBEFETCH_PORT)")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    ensure_not_root("tubefetch-server")?;
    ensure_program_available(&config.ytdlp_path, "--version")?;
    if let Err(err) = ensure_program_available(&config.ffmpeg_path, "-version") {
        warn!(%err, "video-only formats cannot be muxed until ffmpeg is available");
    }

    let extractor = YtDlp::new(&config.ytdlp_path).with_cookies(config.cookies_file.clone());
    let muxer = Muxer::new(&config.ffmpeg_path);
    info!(
        ytdlp = %extractor.program().display(),
        ffmpeg = %muxer.program().display(),
        "external tools configured"
    );

    let app = router(AppState::new(Arc::new(extractor), muxer));

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing bind address {}", config.host))?,
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

/// File values first, then the `TUBEFETCH_PORT` environment variable, then
/// command-line flags.
fn resolve_config(cli: &Cli) -> Result<ServerConfig> {
    let mut config = config::load_server_config_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if let Some(port) = std::env::var("TUBEFETCH_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.port = port;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

/// Runs `<program> <version_flag>` to fail loudly when a dependency is missing.
fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("{} is installed but returned a failure status", program.display()),
        Err(err) => bail!("{} is not installed or not in PATH: {}", program.display(), err),
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "failed to install Ctrl+C handler");
    }
}
