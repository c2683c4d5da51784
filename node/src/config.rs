//! Node configuration, loaded from YAML.

use crate::Error;
use anchor_ledger::{
    gateway, pipeline,
    retry::Policy,
    units::{millis, Amount},
    NZUsize,
};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path, time::Duration};

/// Every tunable of a [crate::Node]. Omitted fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the authority's REST surface.
    pub authority_url: String,
    /// JSON-RPC endpoint of the ledger.
    pub ledger_url: String,
    /// Timeout applied to every request sent to the authority or the ledger.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    pub gateway: gateway::Config,
    pub pipeline: pipeline::Config,

    /// Retry behavior while waiting for the authority to serve.
    pub discovery: Policy,
    /// Retry behavior for faucet requests.
    pub faucet: Policy,
    /// Retry behavior while waiting for funds to appear on the ledger.
    pub funding: Policy,
    /// Retry behavior for fetching the deployed contract.
    pub contract: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authority_url: "http://127.0.0.1:5000".into(),
            ledger_url: "http://127.0.0.1:8545".into(),
            request_timeout: Duration::from_secs(20),
            gateway: gateway::Config::default(),
            pipeline: pipeline::Config {
                gas_price: Amount::wei(1_000_000_000),
                gas_limit: None,
                receipt_timeout: Duration::from_secs(20),
            },
            discovery: Policy::new(NZUsize!(20), Duration::from_secs(4)),
            faucet: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            funding: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            contract: Policy::new(NZUsize!(3), Duration::from_secs(4)),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("authority_url: http://authority:5000\n").unwrap();
        assert_eq!(config.authority_url, "http://authority:5000");
        assert_eq!(
            config.discovery,
            Policy::new(NZUsize!(20), Duration::from_secs(4))
        );
        assert_eq!(config.pipeline.gas_price, Amount::wei(1_000_000_000));
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("node.example.yaml");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.faucet, Policy::new(NZUsize!(3), Duration::from_secs(4)));
    }
}
