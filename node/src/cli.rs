//! # CLI Interface
//!
//! Defines the command-line argument structure for `xrp-gateway` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use xrp_gateway::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT};

/// XRP Ledger payment gateway.
///
/// Builds unsigned payments for offline signing, broadcasts signed ones
/// exactly once, and reports their status. Serves the HTTP API and
/// Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "xrp-gateway",
    about = "XRP Ledger payment gateway",
    version,
    propagate_version = true
)]
pub struct GatewayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Create the data directory and write a default settings file.
    Init(InitArgs),
    /// Query a running gateway's `/isalive` endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the settings file (TOML).
    ///
    /// When omitted, `settings.toml` in the data directory is used if present,
    /// built-in defaults otherwise.
    #[arg(long, short = 'c', env = "XRPGW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the operation database.
    #[arg(long, short = 'd', env = "XRPGW_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "XRPGW_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "XRPGW_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Overrides `ledger_url` from the settings file. `memory://` runs
    /// against an in-process ledger.
    #[arg(long, env = "XRPGW_LEDGER_URL")]
    pub ledger_url: Option<String>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "XRPGW_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, env = "XRPGW_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "XRPGW_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Environment name written into the settings file.
    #[arg(long, default_value = "development")]
    pub environment: String,

    /// Overwrite an existing settings file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running gateway.
    #[arg(long, env = "XRPGW_URL", default_value = "http://127.0.0.1:5000")]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        GatewayCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = GatewayCli::try_parse_from(["xrp-gateway", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.api_port, DEFAULT_API_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert!(args.ledger_url.is_none());
    }

    #[test]
    fn ledger_url_override() {
        let cli =
            GatewayCli::try_parse_from(["xrp-gateway", "run", "--ledger-url", "memory://"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.ledger_url.as_deref(), Some("memory://"));
    }
}
