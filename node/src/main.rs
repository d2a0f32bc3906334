// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # XRP Gateway Service
//!
//! Entry point for the `xrp-gateway` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the operation database, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`: start the gateway
//! - `init`: create the data directory and a default settings file
//! - `status`: query a running gateway's liveness endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use xrp_gateway::config::GatewaySettings;
use xrp_gateway::ledger::rippled::FeePolicy;
use xrp_gateway::ledger::{LedgerClient, RippledClient, ScriptedLedger};
use xrp_gateway::storage::GatewayDB;

use cli::{Commands, GatewayCli};
use logging::LogFormat;
use metrics::GatewayMetrics;

/// Settings file name inside the data directory.
const SETTINGS_FILE: &str = "settings.toml";

/// URL scheme selecting the in-process ledger.
const MEMORY_LEDGER_SCHEME: &str = "memory://";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GatewayCli::parse();

    match cli.command {
        Commands::Run(args) => run_gateway(args).await,
        Commands::Init(args) => init_gateway(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the gateway: API server and metrics endpoint.
async fn run_gateway(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let mut settings = load_settings(args.config.as_deref(), &args.data_dir)?;
    if let Some(url) = &args.ledger_url {
        settings.ledger_url = url.clone();
    }
    let settings = Arc::new(settings);

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        ledger_url = %settings.ledger_url,
        environment = %settings.environment,
        "starting xrp-gateway"
    );

    // --- Storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create data directory: {}", db_path.display()))?;
    let db = GatewayDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    for asset in settings.registered_assets() {
        db.assets()
            .upsert(&asset)
            .with_context(|| format!("failed to register asset {}", asset.asset_id))?;
    }

    let ledger = ledger_client(&settings);
    let gateway_metrics = Arc::new(GatewayMetrics::new());
    let app_state = api::AppState::new(
        db.clone(),
        ledger,
        Arc::clone(&settings),
        Arc::clone(&gateway_metrics),
    );

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("xrp-gateway stopped");
    Ok(())
}

/// Reads settings from `--config`, else `settings.toml` in the data
/// directory, else built-in defaults.
fn load_settings(config: Option<&Path>, data_dir: &Path) -> Result<GatewaySettings> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => {
            let default_path = data_dir.join(SETTINGS_FILE);
            if !default_path.exists() {
                tracing::info!("no settings file found, using defaults");
                return Ok(GatewaySettings::default());
            }
            default_path
        }
    };

    let settings = GatewaySettings::load(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    tracing::info!(path = %path.display(), "settings loaded");
    Ok(settings)
}

fn ledger_client(settings: &GatewaySettings) -> Arc<dyn LedgerClient> {
    if settings.ledger_url.starts_with(MEMORY_LEDGER_SCHEME) {
        tracing::warn!("using the in-process ledger, nothing reaches the XRP Ledger");
        return Arc::new(ScriptedLedger::new(rust_decimal::Decimal::new(1, 5), 1));
    }
    Arc::new(RippledClient::new(
        settings.ledger_url.clone(),
        settings.ledger_timeout(),
        FeePolicy {
            cushion: settings.fee_cushion,
            max_fee: settings.max_fee,
        },
    ))
}

/// Creates the data directory and writes a default settings file.
fn init_gateway(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("xrp_gateway_node=info", LogFormat::Pretty);

    let path = write_default_settings(&args.data_dir, &args.environment, args.force)?;

    println!("Gateway initialized successfully.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Environment    : {}", args.environment);
    println!("  Settings       : {}", path.display());

    Ok(())
}

fn write_default_settings(data_dir: &Path, environment: &str, force: bool) -> Result<PathBuf> {
    tracing::info!(data_dir = %data_dir.display(), environment, "initializing data directory");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let path = data_dir.join(SETTINGS_FILE);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    let settings = GatewaySettings {
        environment: environment.to_string(),
        ..GatewaySettings::default()
    };
    std::fs::write(&path, settings.to_toml()?)
        .with_context(|| format!("failed to write settings to {}", path.display()))?;

    tracing::info!(path = %path.display(), "settings file written");
    Ok(path)
}

/// Queries a running gateway's `/isalive` endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/isalive", args.url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("{} returned an error", url))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("invalid /isalive response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("xrp-gateway {}", env!("CARGO_PKG_VERSION"));
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
