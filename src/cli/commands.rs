//! CLI commands for the versionbits node
//!
//! Implements all command handlers for the CLI interface.

use crate::cli::simulate::{run_bip113_scenario, VERSION_LEGACY};
use crate::core::{Block, Blockchain, ChainParams, Network, ThresholdState};
use crate::rpc::NodeRpc;
use crate::storage::{Storage, StorageConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub blockchain: Blockchain,
    pub storage: Storage,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load the chain from `data_dir`
    pub fn new(data_dir: PathBuf) -> CliResult<Self> {
        let storage = Storage::new(StorageConfig::in_dir(&data_dir))?;
        let blockchain = storage.load()?;

        Ok(Self {
            blockchain,
            storage,
            data_dir,
        })
    }

    /// Save the current state
    pub fn save(&self) -> CliResult<()> {
        self.storage.save(&self.blockchain)?;
        Ok(())
    }
}

/// Whether `data_dir` already holds a saved chain
pub fn chain_exists(data_dir: &Path) -> bool {
    StorageConfig::in_dir(data_dir).chain_path().exists()
}

/// Resolve chain parameters from a network name and an optional JSON override
pub fn resolve_params(network: Network, params_file: Option<&Path>) -> CliResult<ChainParams> {
    let params = match params_file {
        Some(path) => ChainParams::load(path)?,
        None => ChainParams::for_network(network),
    };
    params.validate()?;
    Ok(params)
}

fn format_time(timestamp: u32) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

/// Initialize a new chain
pub fn cmd_init(data_dir: &Path, params: ChainParams, force: bool) -> CliResult<()> {
    let storage = Storage::new(StorageConfig::in_dir(data_dir))?;

    if storage.exists() && !force {
        println!("⚠️  Chain already exists at {:?}", data_dir);
        println!("   Use --force to reinitialize (this will delete existing data)");
        return Ok(());
    }

    let blockchain = Blockchain::new(params);
    storage.save(&blockchain)?;

    println!("✅ Chain initialized!");
    println!("   📁 Data directory: {:?}", data_dir);
    println!("   🌐 Network: {}", blockchain.params.network);
    println!("   🧱 Genesis block hash: {}", blockchain.latest_block().hash);
    for deployment in &blockchain.params.deployments {
        println!(
            "   🔧 {} (bit {}, {}/{} per window)",
            deployment.name, deployment.bit, deployment.threshold, deployment.period
        );
    }

    Ok(())
}

/// Mine trivial blocks on the tip
pub fn cmd_generate(
    state: &mut AppState,
    count: u32,
    address: Option<&str>,
    version: Option<u32>,
) -> CliResult<()> {
    if version.is_some() {
        state.blockchain.block_version = version;
    }

    let recipient = match address {
        Some(a) => a.to_string(),
        None => state.blockchain.get_new_address(),
    };

    println!("⛏️  Generating {} block(s) for {}", count, recipient);
    let hashes = state.blockchain.generate(count, &recipient)?;
    state.save()?;

    for hash in hashes.iter().rev().take(5).rev() {
        if let Some(block) = state.blockchain.get_block_by_hash(hash) {
            println!(
                "   #{} | {} | version {:#010x} | {}",
                block.height(),
                short(hash),
                block.header.version,
                format_time(block.header.timestamp)
            );
        }
    }
    if hashes.len() > 5 {
        println!("   ... and {} earlier", hashes.len() - 5);
    }
    println!("\n   Height is now {}", state.blockchain.height());

    Ok(())
}

/// Submit a block from a JSON file
pub fn cmd_submit(state: &mut AppState, path: &Path) -> CliResult<()> {
    let block: Block = serde_json::from_str(&fs::read_to_string(path)?)?;
    let height = block.height();

    let status = state.blockchain.submit_block(block);
    if status.is_accepted() {
        state.save()?;
    }

    println!("📨 Block at height {}: {}", height, serde_json::to_string(&status)?);
    Ok(())
}

/// Show deployment status for the next block
pub fn cmd_status(state: &mut AppState, deployment: Option<&str>) -> CliResult<()> {
    let names: Vec<String> = match deployment {
        Some(name) => vec![state.blockchain.params.deployment(name)?.name.clone()],
        None => state
            .blockchain
            .params
            .deployments
            .iter()
            .map(|d| d.name.clone())
            .collect(),
    };

    println!("🗳️  Deployments at height {}", state.blockchain.height() + 1);
    for name in names {
        let status = state.blockchain.get_deployment_status(&name)?;
        println!("   {} : {}", name, status);

        if status == ThresholdState::Started {
            let stats = state.blockchain.deployment_statistics(&name)?;
            println!(
                "      {}/{} signaling over {} of {} blocks{}",
                stats.count,
                stats.threshold,
                stats.elapsed,
                stats.period,
                if stats.possible { "" } else { " (cannot lock in this window)" }
            );
        }
    }

    Ok(())
}

/// Display chain info
pub fn cmd_info(state: &mut AppState, json: bool) -> CliResult<()> {
    let info = state.blockchain.get_blockchain_info()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let stats = state.blockchain.stats()?;
    println!("⛓️  Chain Info");
    println!("   ├─ Network: {}", info.chain);
    println!("   ├─ Height: {}", info.blocks);
    println!("   ├─ Transactions: {}", stats.total_transactions);
    println!("   ├─ Median time past: {} ({})", info.median_time, format_time(info.median_time));
    println!("   ├─ Best block: {}", info.best_block_hash);
    println!("   └─ Softforks:");
    for (name, fork) in &info.bip9_softforks {
        println!("      └─ {} (bit {}): {}", name, fork.bit, fork.status);
    }

    Ok(())
}

/// Show the median time past at a height (tip by default)
pub fn cmd_mtp(state: &AppState, height: Option<u64>) -> CliResult<()> {
    let height = height.unwrap_or_else(|| state.blockchain.height());
    let mtp = state.blockchain.median_time_past(height)?;

    println!("🕰️  Median time past at height {}: {} ({})", height, mtp, format_time(mtp));
    if let Some(block) = state.blockchain.get_block(height) {
        println!(
            "   Block time: {} ({})",
            block.header.timestamp,
            format_time(block.header.timestamp)
        );
    }

    Ok(())
}

/// List recent blocks
pub fn cmd_blocks(state: &AppState, count: u32) -> CliResult<()> {
    let height = state.blockchain.height();
    let start = height.saturating_sub(count.saturating_sub(1) as u64);

    println!("🧱 Recent blocks:");
    for h in (start..=height).rev() {
        if let Some(block) = state.blockchain.get_block(h) {
            println!(
                "   #{} | {} | version {:#010x} | {} tx | {}",
                h,
                short(&block.hash),
                block.header.version,
                block.transactions.len(),
                format_time(block.header.timestamp)
            );
        }
    }

    Ok(())
}

/// Validate the chain linkage
pub fn cmd_validate(state: &AppState) -> CliResult<()> {
    println!("🔍 Validating chain...");

    if state.blockchain.is_valid() {
        println!("✅ Chain is valid!");
        println!("   {} blocks verified", state.blockchain.blocks.len());
    } else {
        println!("❌ Chain validation FAILED!");
    }

    Ok(())
}

/// Print chain parameters as JSON, optionally writing them to a file
pub fn cmd_params(params: &ChainParams, output: Option<&Path>) -> CliResult<()> {
    match output {
        Some(path) => {
            params.save(path)?;
            println!("📝 Parameters written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(params)?),
    }
    Ok(())
}

/// Export the chain to a file
pub fn cmd_export(state: &AppState, path: &Path) -> CliResult<()> {
    crate::storage::save_to_file(&state.blockchain, path)?;
    println!("📦 Chain exported to {:?}", path);
    Ok(())
}

/// Import a chain from a file
pub fn cmd_import(state: &mut AppState, path: &Path) -> CliResult<()> {
    state.blockchain = crate::storage::load_from_file(path)?;
    state.save()?;

    println!("📥 Chain imported from {:?}", path);
    println!("   Height: {}", state.blockchain.height());
    Ok(())
}

/// Run the BIP113 activation scenario on a fresh in-memory regtest chain
pub fn cmd_simulate(start_time: Option<u32>) -> CliResult<()> {
    let start_time = match start_time {
        Some(t) => t,
        None => u32::try_from(chrono::Utc::now().timestamp())?,
    };

    let mut node = Blockchain::new(ChainParams::regtest());
    node.set_mock_time(Some(start_time));
    // Generated blocks must not signal on their own
    node.block_version = Some(VERSION_LEGACY);

    println!("🧪 Running BIP113 activation scenario from {}", format_time(start_time));
    let report = run_bip113_scenario(&mut node, start_time)?;

    for step in &report.steps {
        let mark = if step.passed() { "✅" } else { "❌" };
        println!(
            "   {} {}: expected {}, got {}",
            mark, step.description, step.expected, step.actual
        );
    }

    if !report.all_passed() {
        return Err("activation scenario did not behave as expected".into());
    }

    println!("\n   Final height: {}", node.height());
    Ok(())
}
