//! # CLI Interface
//!
//! Defines the command-line argument structure for `veilstream-node` using
//! `clap` derive. Supports three subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use veilstream_protocol::config::{BLOCK_TIME_SECS, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};

use crate::logging::LogFormat;

/// Veilstream development node.
///
/// Hosts one confidential stream token backed by the in-process cleartext
/// coprocessor and local decryption oracle, advances a block clock, serves
/// the contract's operation surface over HTTP and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "veilstream-node",
    about = "Veilstream confidential stream token development node",
    version,
    propagate_version = true
)]
pub struct VeilstreamNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory with a default token config and a fresh
    /// operator key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the token configuration file (JSON).
    ///
    /// When omitted, the node looks for `config.json` in the data directory
    /// and falls back to built-in defaults.
    #[arg(long, short = 'c', env = "VEILSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding `config.json` and `operator.key`.
    #[arg(
        long,
        short = 'd',
        env = "VEILSTREAM_DATA_DIR",
        default_value = "./veilstream-data"
    )]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "VEILSTREAM_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VEILSTREAM_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Seconds of block time added per block.
    #[arg(
        long,
        env = "VEILSTREAM_BLOCK_TIME_SECS",
        default_value_t = BLOCK_TIME_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub block_time_secs: u64,

    /// Log output format.
    #[arg(long, env = "VEILSTREAM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Hex-encoded Ed25519 operator private key.
    ///
    /// If not provided, the node reads `operator.key` from the data
    /// directory, or generates an ephemeral key.
    /// **Never pass this flag outside development.**
    #[arg(long, env = "VEILSTREAM_OPERATOR_KEY")]
    pub operator_key: Option<String>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(
        long,
        short = 'd',
        env = "VEILSTREAM_DATA_DIR",
        default_value = "./veilstream-data"
    )]
    pub data_dir: PathBuf,

    /// Overwrite an existing config and operator key.
    #[arg(long)]
    pub force: bool,
}
