// Copyright (c) 2026 Veilstream Contributors. MIT License.
// See LICENSE for details.

//! # Veilstream Development Node
//!
//! Entry point for the `veilstream-node` binary. Parses CLI arguments,
//! initializes logging and metrics, deploys one confidential stream token
//! and serves it over HTTP.
//!
//! The binary supports three subcommands:
//!
//! - `run`: start the node
//! - `init`: write a default config and operator key
//! - `version`: print build version information

mod api;
mod clock;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;

use veilstream_contracts::ConfidentialStreamToken;
use veilstream_protocol::config::{TokenConfig, ORACLE_POLL_INTERVAL, PROTOCOL_VERSION};
use veilstream_protocol::crypto::AccountKeypair;
use veilstream_protocol::fhe::CleartextCoprocessor;
use veilstream_protocol::gateway::LocalOracle;
use veilstream_protocol::Address;

use clock::BlockClock;
use cli::{Commands, VeilstreamNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

const CONFIG_FILE: &str = "config.json";
const OPERATOR_KEY_FILE: &str = "operator.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VeilstreamNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: block clock, oracle pump, API server and metrics
/// endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "veilstream_node=info,veilstream_contracts=info,veilstream_protocol=info,tower_http=info",
        args.log_format,
    );

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        block_time_secs = args.block_time_secs,
        data_dir = %args.data_dir.display(),
        "starting veilstream-node"
    );

    // --- Configuration ---
    let config = load_config(args.config.as_deref(), &args.data_dir)?;
    let operator = load_operator_key(args.operator_key.as_deref(), &args.data_dir)?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Contract ---
    let coprocessor = Arc::new(CleartextCoprocessor::new());
    let oracle = Arc::new(LocalOracle::new(
        Arc::clone(&coprocessor),
        config.oracle_queue_capacity,
    ));
    let contract = Address::derive_contract(&operator.address(), 0);
    let token = ConfidentialStreamToken::new(
        contract,
        &config,
        Arc::clone(&coprocessor),
        oracle.clone(),
    );

    let now = chrono::Utc::now();
    let genesis_timestamp = u64::try_from(now.timestamp()).context("system clock is before 1970")?;

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        operator: operator.address(),
        started_at: now.to_rfc3339(),
        clock: Arc::new(BlockClock::new(genesis_timestamp, args.block_time_secs)),
        token: Arc::new(Mutex::new(token)),
        coprocessor,
        oracle,
        disclosures: Arc::new(RwLock::new(HashMap::new())),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!(%contract, "API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Block clock ---
    let clock_ref = Arc::clone(&app_state.clock);
    let metrics_ref = Arc::clone(&node_metrics);
    let block_time = std::time::Duration::from_secs(args.block_time_secs);
    let block_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(block_time);
        interval.tick().await;
        loop {
            interval.tick().await;
            let block = clock_ref.advance();
            metrics_ref.block_height.set(block.height as i64);
            tracing::debug!(height = block.height, timestamp = block.timestamp, "block produced");
        }
    });

    // --- Oracle pump ---
    let pump_state = app_state.clone();
    let oracle_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ORACLE_POLL_INTERVAL);
        loop {
            interval.tick().await;
            api::pump_oracle(&pump_state).await;
        }
    });

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

    block_loop.abort();
    oracle_loop.abort();
    tracing::info!("veilstream-node stopped");
    Ok(())
}

/// Explicit `--config`, else `config.json` in the data directory, else
/// defaults.
fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<TokenConfig> {
    let (config, source) = match explicit {
        Some(path) => (
            TokenConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            path.display().to_string(),
        ),
        None => {
            let path = data_dir.join(CONFIG_FILE);
            if path.exists() {
                (
                    TokenConfig::load(&path)
                        .with_context(|| format!("failed to load config from {}", path.display()))?,
                    path.display().to_string(),
                )
            } else {
                (TokenConfig::default(), "defaults".to_string())
            }
        }
    };
    config.validate().context("invalid token config")?;
    tracing::info!(
        %source,
        name = %config.name,
        symbol = %config.symbol,
        chain_id = config.chain_id,
        rate_per_second = config.stream.rate_per_second,
        "token config loaded"
    );
    Ok(config)
}

/// Explicit `--operator-key`, else `operator.key` in the data directory,
/// else an ephemeral key.
fn load_operator_key(explicit: Option<&str>, data_dir: &Path) -> Result<AccountKeypair> {
    if let Some(hex_key) = explicit {
        return AccountKeypair::from_hex(hex_key.trim()).context("invalid --operator-key");
    }

    let key_path = data_dir.join(OPERATOR_KEY_FILE);
    if key_path.exists() {
        let hex_key = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read operator key {}", key_path.display()))?;
        return AccountKeypair::from_hex(hex_key.trim())
            .with_context(|| format!("malformed operator key in {}", key_path.display()));
    }

    let keypair = AccountKeypair::generate();
    tracing::warn!(
        operator = %keypair.address(),
        "no operator key found, using an ephemeral key; the contract address will change on restart"
    );
    Ok(keypair)
}

/// Initializes a data directory with a default config and a fresh
/// operator key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("veilstream_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    let keypair = init_data_dir(data_dir, args.force)?;
    let operator = keypair.address();
    let contract = Address::derive_contract(&operator, 0);

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", data_dir.join(CONFIG_FILE).display());
    println!("  Operator key   : {}", data_dir.join(OPERATOR_KEY_FILE).display());
    println!("  Operator       : {}", operator);
    println!("  Token contract : {}", contract);

    Ok(())
}

/// Write `config.json` and `operator.key` into `data_dir`. Refuses to
/// overwrite either unless `force` is set.
fn init_data_dir(data_dir: &Path, force: bool) -> Result<AccountKeypair> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(CONFIG_FILE);
    let key_path = data_dir.join(OPERATOR_KEY_FILE);
    if !force && (config_path.exists() || key_path.exists()) {
        anyhow::bail!(
            "{} is already initialized; pass --force to overwrite",
            data_dir.display()
        );
    }

    let config = TokenConfig::default();
    std::fs::write(&config_path, config.to_json_pretty()?)
        .with_context(|| format!("failed to write config to {}", config_path.display()))?;

    let keypair = AccountKeypair::generate();
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write operator key to {}", key_path.display()))?;

    // Owner read/write only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        operator = %keypair.address(),
        key_path = %key_path.display(),
        "operator keypair generated"
    );
    Ok(keypair)
}

/// Prints version information to stdout.
fn print_version() {
    println!("veilstream-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol        {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
