//! # CLI Interface
//!
//! Defines the command-line argument structure for `heirloom-node` using
//! `clap` derive. Five subcommands: `deploy`, `run`, `status`, `keygen`
//! and `version`.
//!
//! Deployment parameters keep the environment variable names operators
//! already use (`INITIAL_HEIR`, `INHERITANCE_AMOUNT`, `OWNER_PRIVATE_KEY`).

use clap::{Parser, Subcommand};
use heirloom_protocol::config::{
    DEFAULT_DEV_ACCOUNTS, DEFAULT_FUNDING_AMOUNT, DEFAULT_METRICS_PORT, DEFAULT_NETWORK_URL,
    DEFAULT_RPC_PORT,
};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Heirloom vault host.
///
/// Deploys an inheritance vault, then serves it: JSON-RPC and REST for
/// calls and reads, WebSocket for live events, Prometheus for metrics.
#[derive(Parser, Debug)]
#[command(
    name = "heirloom-node",
    about = "Heirloom inheritance vault host",
    version,
    propagate_version = true
)]
pub struct HeirloomNodeCli {
    /// Log output format.
    #[arg(
        long,
        global = true,
        env = "HEIRLOOM_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Heirloom node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a new vault into the data directory.
    Deploy(DeployArgs),
    /// Serve a deployed vault.
    Run(RunArgs),
    /// Query the status of a running node via its API endpoint.
    Status(StatusArgs),
    /// Generate a fresh Ed25519 keypair and print its address.
    Keygen,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `deploy` subcommand.
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// Directory holding the vault database and owner key.
    #[arg(long, short = 'd', env = "HEIRLOOM_DATA_DIR", default_value = ".heirloom")]
    pub data_dir: PathBuf,

    /// Address of the initial heir (`0x` + 40 hex chars). Required.
    #[arg(long, env = "INITIAL_HEIR")]
    pub heir: Option<String>,

    /// Funding attached at deployment, in whole coins (e.g. `0.001`).
    #[arg(long, env = "INHERITANCE_AMOUNT", default_value = DEFAULT_FUNDING_AMOUNT)]
    pub amount: String,

    /// Hex-encoded Ed25519 secret key of the deployer.
    ///
    /// A fresh key is generated when omitted. Either way the key is
    /// written to `owner.key` in the data directory.
    #[arg(long, env = "OWNER_PRIVATE_KEY", hide_env_values = true)]
    pub owner_key: Option<String>,

    /// Network endpoint recorded with the deployment.
    #[arg(long, env = "HEIRLOOM_NETWORK_URL", default_value = DEFAULT_NETWORK_URL)]
    pub network_url: String,

    /// Seed the owner and the dev accounts with a development allowance.
    #[arg(long)]
    pub dev_fund: bool,

    /// Number of deterministic dev accounts to seed with `--dev-fund`.
    #[arg(long, env = "HEIRLOOM_DEV_ACCOUNTS", default_value_t = DEFAULT_DEV_ACCOUNTS)]
    pub dev_accounts: usize,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the vault database and owner key.
    #[arg(long, short = 'd', env = "HEIRLOOM_DATA_DIR", default_value = ".heirloom")]
    pub data_dir: PathBuf,

    /// Port for the JSON-RPC, REST and WebSocket API.
    #[arg(long, env = "HEIRLOOM_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "HEIRLOOM_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Development mode: manual clock (`dev_increaseTime`) and unlocked
    /// dev accounts.
    #[arg(long)]
    pub dev: bool,

    /// Number of deterministic dev accounts to unlock in `--dev` mode.
    #[arg(long, env = "HEIRLOOM_DEV_ACCOUNTS", default_value_t = DEFAULT_DEV_ACCOUNTS)]
    pub dev_accounts: usize,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,
}
