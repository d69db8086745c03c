#![forbid(unsafe_code)]

//! `gateway-console` — dashboard API server binary.
//!
//! Loads configuration, builds the shared gateway client, and serves the
//! dashboard JSON API until SIGINT/SIGTERM.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use gateway_console::config::GlobalConfig;
use gateway_console::{http, AppError, GatewayClient, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "gateway-console",
    about = "Gateway monitoring console API",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the API port from the configuration.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("gateway-console bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    config.load_credentials().await?;
    if let Some(port) = args.port {
        config.http.port = port;
    }
    info!(gateway = %config.gateway.url, "configuration loaded");

    // ── Shared gateway client ───────────────────────────
    // Connects lazily on the first request.
    let client = GatewayClient::new(&config);

    // ── Serve API ───────────────────────────────────────
    let ct = CancellationToken::new();
    let api_ct = ct.clone();
    let api_client = client.clone();
    let port = config.http.port;
    let api_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(api_client, port, api_ct).await {
            error!(%err, "dashboard API failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    info!(pending = client.pending_requests(), "disconnecting from gateway");
    client.disconnect();

    let _ = api_handle.await;
    info!("gateway-console shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
