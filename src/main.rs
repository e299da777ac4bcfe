//! Versionbits node CLI
//!
//! A command-line interface for a regtest chain with versionbits deployments
//! and median-time-past lock-time rules.

use clap::{Parser, Subcommand};
use mtp_versionbits::cli::{self, AppState};
use mtp_versionbits::core::Network;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "versionbits")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Versionbits activation and median-time-past lock-times", long_about = None)]
struct Cli {
    /// Data directory for chain storage
    #[arg(short, long, default_value = ".versionbits_data")]
    data_dir: PathBuf,

    /// Network preset for new chains (main, test, regtest)
    #[arg(short, long, default_value = "regtest")]
    network: Network,

    /// JSON file with custom chain parameters
    #[arg(short, long)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new chain
    Init {
        /// Overwrite an existing chain
        #[arg(short, long)]
        force: bool,
    },

    /// Mine trivial blocks on the tip
    Generate {
        /// Number of blocks to generate
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Coinbase recipient (a fresh address by default)
        #[arg(short, long)]
        address: Option<String>,

        /// Fixed block version, e.g. 4 or 0x20000001 (sticky)
        #[arg(long, value_parser = parse_version)]
        block_version: Option<u32>,
    },

    /// Submit a block from a JSON file
    Submit {
        /// Block file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show deployment status for the next block
    Status {
        /// Deployment name (all deployments by default)
        deployment: Option<String>,
    },

    /// Display chain information
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the median time past at a height
    Mtp {
        /// Block height (tip by default)
        height: Option<u64>,
    },

    /// List recent blocks
    Blocks {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: u32,
    },

    /// Validate the chain
    Validate,

    /// Print the chain parameters
    Params {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export the chain to a file
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a chain from a file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Run the BIP113 activation scenario in memory
    Simulate {
        /// Unix time of the first scenario block (now by default)
        #[arg(long)]
        start_time: Option<u32>,
    },
}

fn parse_version(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid block version {}: {}", value, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Commands that don't need a stored chain
    match &cli.command {
        Commands::Init { force } => {
            let params = cli::resolve_params(cli.network, cli.params.as_deref())?;
            return cli::cmd_init(&cli.data_dir, params, *force);
        }
        Commands::Simulate { start_time } => return cli::cmd_simulate(*start_time),
        Commands::Params { output } if !cli::chain_exists(&cli.data_dir) => {
            let params = cli::resolve_params(cli.network, cli.params.as_deref())?;
            return cli::cmd_params(&params, output.as_deref());
        }
        _ => {}
    }

    let mut state = AppState::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Init { .. } | Commands::Simulate { .. } => unreachable!(),

        Commands::Generate {
            count,
            address,
            block_version,
        } => {
            cli::cmd_generate(&mut state, count, address.as_deref(), block_version)?;
        }

        Commands::Submit { file } => {
            cli::cmd_submit(&mut state, &file)?;
        }

        Commands::Status { deployment } => {
            cli::cmd_status(&mut state, deployment.as_deref())?;
        }

        Commands::Info { json } => {
            cli::cmd_info(&mut state, json)?;
        }

        Commands::Mtp { height } => {
            cli::cmd_mtp(&state, height)?;
        }

        Commands::Blocks { count } => {
            cli::cmd_blocks(&state, count)?;
        }

        Commands::Validate => {
            cli::cmd_validate(&state)?;
        }

        Commands::Params { output } => {
            cli::cmd_params(&state.blockchain.params, output.as_deref())?;
        }

        Commands::Export { output } => {
            cli::cmd_export(&state, &output)?;
        }

        Commands::Import { input } => {
            cli::cmd_import(&mut state, &input)?;
        }
    }

    Ok(())
}
