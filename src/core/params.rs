//! Chain parameters
//!
//! Network presets for the deployments tracked by the node, plus loading
//! custom parameters from a JSON file.

use crate::core::versionbits::{Deployment, DeploymentStart, VersionBitsError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Name of the deployment bundling BIP-68/112/113
pub const CSV_DEPLOYMENT: &str = "csv";

/// Name of the test deployment on bit 28
pub const TESTDUMMY_DEPLOYMENT: &str = "testdummy";

/// Parameter loading errors
#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidDeployment(#[from] VersionBitsError),
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),
    #[error("Invalid parameters: {0}")]
    Invalid(String),
}

/// Supported networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(ParamsError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Consensus parameters for the activation and lock-time rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    /// Genesis block timestamp
    pub genesis_time: u32,
    /// Genesis block version
    pub genesis_version: u32,
    /// Deployment whose activation switches lock-times to median time past
    #[serde(default = "default_lock_time_deployment")]
    pub lock_time_deployment: String,
    pub deployments: Vec<Deployment>,
}

fn default_lock_time_deployment() -> String {
    CSV_DEPLOYMENT.to_string()
}

impl ChainParams {
    /// Regression test network: 144-block windows, 108 to lock in
    pub fn regtest() -> Self {
        Self {
            network: Network::Regtest,
            genesis_time: 1_296_688_602,
            genesis_version: 1,
            lock_time_deployment: default_lock_time_deployment(),
            deployments: vec![
                Deployment::new(CSV_DEPLOYMENT, 0, 144, 108),
                Deployment::new(TESTDUMMY_DEPLOYMENT, 28, 144, 108),
            ],
        }
    }

    /// Test network: 2016-block windows, 75% to lock in
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            genesis_time: 1_296_688_602,
            genesis_version: 1,
            lock_time_deployment: default_lock_time_deployment(),
            deployments: vec![
                Deployment::new(CSV_DEPLOYMENT, 0, 2016, 1512)
                    .with_start(DeploymentStart::Time(1_456_790_400))
                    .with_timeout(1_493_596_800),
                Deployment::new(TESTDUMMY_DEPLOYMENT, 28, 2016, 1512)
                    .with_start(DeploymentStart::Time(1_199_145_601))
                    .with_timeout(1_230_767_999),
            ],
        }
    }

    /// Main network: 2016-block windows, 95% to lock in
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            genesis_time: 1_231_006_505,
            genesis_version: 1,
            lock_time_deployment: default_lock_time_deployment(),
            deployments: vec![
                Deployment::new(CSV_DEPLOYMENT, 0, 2016, 1916)
                    .with_start(DeploymentStart::Time(1_462_060_800))
                    .with_timeout(1_493_596_800),
                Deployment::new(TESTDUMMY_DEPLOYMENT, 28, 2016, 1916)
                    .with_start(DeploymentStart::Time(1_199_145_601))
                    .with_timeout(1_230_767_999),
            ],
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Look up a deployment by name
    pub fn deployment(&self, name: &str) -> Result<&Deployment, VersionBitsError> {
        self.deployments
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| VersionBitsError::UnknownDeployment(name.to_string()))
    }

    /// The deployment gating median-time-past lock-times
    pub fn lock_time_deployment(&self) -> Result<&Deployment, VersionBitsError> {
        self.deployment(&self.lock_time_deployment)
    }

    /// Check every deployment and the cross-deployment invariants
    pub fn validate(&self) -> Result<(), ParamsError> {
        let mut names = HashSet::new();
        for deployment in &self.deployments {
            deployment.validate()?;
            if !names.insert(deployment.name.as_str()) {
                return Err(ParamsError::Invalid(format!(
                    "duplicate deployment name: {}",
                    deployment.name
                )));
            }
        }

        self.lock_time_deployment()?;
        Ok(())
    }

    /// Load and validate parameters from a JSON file
    pub fn load(path: &Path) -> Result<Self, ParamsError> {
        let file = fs::File::open(path)?;
        let params: ChainParams = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;

        log::info!(
            "Loaded {} chain parameters with {} deployment(s) from {:?}",
            params.network,
            params.deployments.len(),
            path
        );
        Ok(params)
    }

    /// Write parameters as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ParamsError> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::regtest()
    }
}
