//! Messages exchanged between an authority and its nodes over HTTP.
//!
//! `GET /contract` answers with a [crate::artifact::DeployedContract] directly.

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Answer to `GET /status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// True once the authority is serving.
    pub ready: bool,
    /// Bootstrap phase the authority has reached.
    #[serde(default)]
    pub phase: String,
}

/// Body of `POST /faucet`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetRequest {
    pub address: Address,
}

/// Answer to a successful `POST /faucet`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetResponse {
    pub message: String,
    /// Hash of the confirmed funding transaction.
    pub transaction: H256,
    pub amount: U256,
}

/// Query of `GET /balance`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRequest {
    pub address: Address,
}

/// Answer to `GET /balance`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// Checksummed address.
    pub address: String,
    /// Balance in wei.
    pub balance: U256,
    /// Balance formatted in ether.
    pub balance_eth: String,
}

/// Body of any failed request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
