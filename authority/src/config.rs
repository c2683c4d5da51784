//! Authority configuration, loaded from YAML.

use crate::{compiler, Error};
use anchor_ledger::{
    gateway,
    pipeline,
    retry::Policy,
    units::{millis, Amount},
    NZUsize,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

/// Name of the environment variable holding the authority's private key.
pub const DEFAULT_SECRET_ENV: &str = "PRIVATE_KEY";

/// Every tunable of an [crate::Authority]. Omitted fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON-RPC endpoint of the ledger.
    pub ledger_url: String,
    /// Timeout applied to every request sent to the ledger.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Address the REST surface binds to.
    pub listen: SocketAddr,
    /// Environment variable holding the hex-encoded private key.
    pub secret_env: String,

    pub compiler: compiler::Config,
    /// Where the compiled artifact is written for audit. Skipped when unset.
    pub artifact_path: Option<PathBuf>,

    pub gateway: gateway::Config,
    pub pipeline: pipeline::Config,

    /// Retry behavior while waiting for the authority account to be funded.
    pub funding: Policy,
    /// Retry behavior for deployment.
    pub deploy: Policy,
    /// Retry behavior for faucet transfers.
    pub faucet: Policy,

    /// Smallest balance accepted as funded.
    pub min_balance: Amount,
    /// Value endowed to the contract on deployment.
    pub deploy_value: Amount,
    /// Value sent to each node that asks the faucet.
    pub faucet_amount: Amount,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_url: "http://127.0.0.1:8545".into(),
            request_timeout: Duration::from_secs(20),
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5000)),
            secret_env: DEFAULT_SECRET_ENV.into(),
            compiler: compiler::Config::default(),
            artifact_path: Some(PathBuf::from("artifacts/compiled.json")),
            gateway: gateway::Config::default(),
            pipeline: pipeline::Config {
                gas_price: Amount::wei(27_300_000_000),
                gas_limit: None,
                receipt_timeout: Duration::from_secs(20),
            },
            funding: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            deploy: Policy::new(NZUsize!(20), Duration::from_secs(5)),
            faucet: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            min_balance: Amount::wei(1),
            deploy_value: Amount::ether(3),
            faucet_amount: Amount::ether(500),
        }
    }
}

impl Config {
    /// Load configuration from the YAML file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}
