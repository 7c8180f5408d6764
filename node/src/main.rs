// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Heirloom Node
//!
//! Entry point for the `heirloom-node` binary. Parses CLI arguments,
//! initializes logging and metrics, and either deploys a vault or serves a
//! deployed one over HTTP/WS.
//!
//! Subcommands:
//!
//! - `deploy`  : create and fund the vault in a data directory
//! - `run`     : serve the deployed vault
//! - `status`  : query a running node's status endpoint
//! - `keygen`  : generate a keypair
//! - `version` : print build version information

mod api;
mod cli;
mod deploy;
mod host;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use heirloom_protocol::storage::VaultDB;
use heirloom_protocol::{Address, Amount, Clock, ManualClock, SystemClock, VaultKeypair};

use cli::{Commands, HeirloomNodeCli};
use deploy::DeployParams;
use host::VaultHost;
use metrics::VaultMetrics;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_LOG_FILTER: &str =
    "heirloom_node=info,heirloom_protocol=info,heirloom_contracts=info,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HeirloomNodeCli::parse();
    let log_format = cli.log_format;

    match cli.command {
        Commands::Deploy(args) => {
            logging::init_logging(DEFAULT_LOG_FILTER, log_format)?;
            deploy_command(args)
        }
        Commands::Run(args) => {
            logging::init_logging(DEFAULT_LOG_FILTER, log_format)?;
            run_node(args).await
        }
        Commands::Status(args) => query_status(args).await,
        Commands::Keygen => {
            keygen();
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn open_db(data_dir: &Path) -> Result<VaultDB> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = VaultDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

/// Deploys the vault and writes the owner key into the data directory.
fn deploy_command(args: cli::DeployArgs) -> Result<()> {
    let heir_str = match args.heir.as_deref().map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => bail!("heir is required"),
    };
    let heir: Address = heir_str
        .parse()
        .with_context(|| format!("invalid heir address '{}'", heir_str))?;
    let funding = Amount::parse_decimal(&args.amount)
        .with_context(|| format!("invalid funding amount '{}'", args.amount))?;

    let owner = match args.owner_key.as_deref() {
        Some(hex) => VaultKeypair::from_hex(hex).context("invalid OWNER_PRIVATE_KEY")?,
        None => {
            tracing::info!("no owner key supplied, generating one");
            VaultKeypair::generate()
        }
    };

    let db = open_db(&args.data_dir)?;

    let dev_fund = if args.dev_fund {
        let mut accounts = BTreeSet::from([owner.address()]);
        accounts.extend(
            (0..args.dev_accounts as u32).map(|i| VaultKeypair::dev_account(i).address()),
        );
        accounts.into_iter().collect()
    } else {
        Vec::new()
    };

    let (deployment, key_path) = deploy::deploy_with_owner_key(
        &db,
        &args.data_dir,
        &owner,
        DeployParams {
            owner: owner.address(),
            heir,
            funding,
            network_url: args.network_url.clone(),
            dev_fund,
            now: Utc::now(),
        },
    )
    .context("deployment failed")?;

    println!("Vault deployed.");
    println!("  Vault id       : {}", deployment.vault_id);
    println!("  Owner          : {}", deployment.deployer);
    println!("  Heir           : {}", deployment.heir);
    println!("  Funding        : {}", deployment.funding);
    println!("  Network        : {}", deployment.network_url);
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Owner key      : {}", key_path.display());

    Ok(())
}

/// Serves the deployed vault: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        dev = args.dev,
        "starting heirloom-node"
    );

    let db = open_db(&args.data_dir)?;
    let deployment = deploy::load_deployment(&db)
        .with_context(|| format!("no vault in {}; run `deploy` first", args.data_dir.display()))?;

    // --- Unlocked accounts ---
    let mut unlocked = BTreeSet::new();
    if let Some(owner) = deploy::read_owner_key(&args.data_dir)? {
        unlocked.insert(owner.address());
    }
    if args.dev {
        for i in 0..args.dev_accounts as u32 {
            let account = VaultKeypair::dev_account(i);
            tracing::info!(index = i, address = %account.address(), "dev account unlocked");
            unlocked.insert(account.address());
        }
    }

    // --- Clock ---
    let system_clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dev_clock = args.dev.then(|| ManualClock::new(system_clock.now()));

    // --- Metrics ---
    let vault_metrics = Arc::new(VaultMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Host ---
    let host = VaultHost::load(
        db,
        system_clock,
        dev_clock,
        unlocked,
        event_tx,
        Arc::clone(&vault_metrics),
    )
    .context("failed to load vault")?;

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            heirloom_protocol::config::PROTOCOL_VERSION,
        ),
        network_url: deployment.network_url,
        host: Arc::new(host),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&vault_metrics));
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

    tracing::info!("heirloom-node stopped");
    Ok(())
}

/// Prints a fresh keypair. Nothing is written to disk.
fn keygen() {
    let keypair = VaultKeypair::generate();
    println!("Address     : {}", keypair.address());
    println!("Public key  : {}", keypair.public_key().to_hex());
    println!("Private key : {}", keypair.secret_key_hex());
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body: String = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Plain HTTP/1.1 GET over a tokio TCP stream.
async fn http_get(url: &str) -> Result<String> {
    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let host = parsed.host_str();
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Body is everything after the first blank line.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("heirloom-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", heirloom_protocol::config::PROTOCOL_VERSION);
    println!(
        "inactivity    {} days",
        heirloom_protocol::config::INACTIVITY_DELAY_SECS / 86_400
    );
    println!("rustc         {}", rustc_version());
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

/// Just enough URL parsing for `status`: host, port and path.
mod url {
    #[derive(Debug)]
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> &str {
            &self.host
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if s.starts_with("https://") {
                return Err("https is not supported by `status`".to_string());
            }
            let rest = s.strip_prefix("http://").unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };
            if authority.is_empty() {
                return Err("missing host".to_string());
            }

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_host_port_and_path() {
            let url: Url = "http://127.0.0.1:8545/status".parse().unwrap();
            assert_eq!(url.host_str(), "127.0.0.1");
            assert_eq!(url.port(), Some(8545));
            assert_eq!(url.path(), "/status");
        }

        #[test]
        fn defaults_path_and_port() {
            let url: Url = "http://localhost".parse().unwrap();
            assert_eq!(url.port(), None);
            assert_eq!(url.path(), "/");
        }

        #[test]
        fn rejects_https_and_bad_port() {
            assert!("https://example.com/status".parse::<Url>().is_err());
            assert!("http://localhost:notaport/".parse::<Url>().is_err());
        }
    }
}
