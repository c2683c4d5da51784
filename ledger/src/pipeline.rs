//! Turn logical calls into confirmed transactions.
//!
//! [Pipeline::submit] is the only way a transaction reaches the ledger. It
//! resolves a fresh nonce, the chain id, and a gas estimate, signs the result
//! with the pipeline's [Identity], broadcasts it through the [Gateway], and
//! waits for a receipt. A receipt that reports failure is surfaced as
//! [Error::Reverted] and is never retried.

use crate::{
    artifact::{ContractArtifact, DeployedContract},
    gateway::{Gateway, Receipt, Rpc},
    identity::Identity,
    units::{millis, Amount},
    Error,
};
use ethers::{
    abi::Token,
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H256, U256,
    },
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// A logical interaction with the ledger, before any network-derived fields
/// are known.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// Short description used in logs.
    pub label: String,
    /// Recipient, or `None` to create a contract.
    pub target: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl Call {
    /// Move `value` to `to`.
    pub fn transfer(to: Address, value: U256) -> Self {
        Self {
            label: "transfer".into(),
            target: Some(to),
            data: Bytes::default(),
            value,
        }
    }

    /// Create `artifact` with constructor `args`, endowing it with `value`.
    pub fn deploy(artifact: &ContractArtifact, args: &[Token], value: U256) -> Result<Self, Error> {
        Ok(Self {
            label: "deploy".into(),
            target: None,
            data: artifact.deploy_data(args)?,
            value,
        })
    }

    /// Invoke `method` on a deployed `contract`.
    pub fn method(contract: &DeployedContract, method: &str, args: &[Token]) -> Result<Self, Error> {
        Ok(Self {
            label: method.into(),
            target: Some(contract.address),
            data: contract.encode(method, args)?,
            value: U256::zero(),
        })
    }

    /// Attach `value` to the call.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Returns the request used to estimate gas for this call when sent by `from`.
    pub fn request(&self, from: Address) -> TransactionRequest {
        let mut request = TransactionRequest::new()
            .from(from)
            .value(self.value)
            .data(self.data.clone());
        if let Some(target) = self.target {
            request = request.to(target);
        }
        request
    }
}

/// A [Call] with every field needed for signing resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsignedCall {
    pub call: Call,
    pub chain_id: u64,
    pub from: Address,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas: U256,
}

impl UnsignedCall {
    /// Returns the legacy transaction described by this call.
    pub fn transaction(&self) -> TypedTransaction {
        let request = self
            .call
            .request(self.from)
            .nonce(self.nonce)
            .gas(self.gas)
            .gas_price(self.gas_price)
            .chain_id(self.chain_id);
        TypedTransaction::Legacy(request)
    }
}

/// A signed transaction ready for broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Identifier the ledger will report for this transaction.
    pub hash: H256,
    pub raw: Bytes,
}

impl SignedEnvelope {
    pub fn new(raw: Bytes) -> Self {
        Self {
            hash: H256::from(keccak256(&raw)),
            raw,
        }
    }
}

/// Configuration for a [Pipeline].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Price paid per unit of gas.
    pub gas_price: Amount,
    /// Fixed gas limit. When unset, every call is estimated by the ledger.
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// How long to wait for a receipt after broadcast.
    #[serde(rename = "receipt_timeout_ms", with = "millis")]
    pub receipt_timeout: Duration,
}

/// Signs and submits calls on behalf of a single [Identity].
#[derive(Clone)]
pub struct Pipeline<R: Rpc> {
    identity: Arc<Identity>,
    gateway: Gateway<R>,
    config: Config,
}

impl<R: Rpc> Pipeline<R> {
    /// Create a new [Pipeline].
    pub fn new(identity: Arc<Identity>, gateway: Gateway<R>, config: Config) -> Self {
        Self {
            identity,
            gateway,
            config,
        }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn gateway(&self) -> &Gateway<R> {
        &self.gateway
    }

    /// Submit `call` and wait for its receipt.
    ///
    /// The nonce is read from the ledger on every call. The identity's
    /// submission lock is held until the receipt arrives (or the submission
    /// fails), so concurrent callers sharing an identity are serialized.
    pub async fn submit(&self, call: Call) -> Result<Receipt, Error> {
        let _sequence = self.identity.sequence().await;
        let from = self.identity.address();
        let label = call.label.clone();

        // Resolve network-derived fields
        let nonce = self.gateway.transaction_count(from).await?;
        let chain_id = self.gateway.chain_id().await?;
        let gas = match self.config.gas_limit {
            Some(limit) => U256::from(limit),
            None => self.gateway.estimate_gas(call.request(from)).await?,
        };
        let unsigned = UnsignedCall {
            call,
            chain_id,
            from,
            nonce,
            gas_price: self.config.gas_price.into(),
            gas,
        };

        // Sign and broadcast
        let envelope = self.identity.sign(&unsigned)?;
        debug!(label = %label, %nonce, %gas, hash = ?envelope.hash, "broadcasting transaction");
        let hash = self.gateway.submit(&envelope).await?;

        // Wait for confirmation
        let receipt = self
            .gateway
            .await_receipt(hash, self.config.receipt_timeout)
            .await?;
        if !receipt.success {
            return Err(Error::Reverted(receipt.transaction_hash));
        }
        info!(
            label = %label,
            %nonce,
            hash = ?receipt.transaction_hash,
            block = ?receipt.block_number,
            "transaction confirmed"
        );
        Ok(receipt)
    }

    /// Invoke a read-only `method` on `contract` and decode its output.
    pub async fn read(
        &self,
        contract: &DeployedContract,
        method: &str,
        args: &[Token],
    ) -> Result<Vec<Token>, Error> {
        let data = contract.encode(method, args)?;
        let request = TransactionRequest::new()
            .from(self.identity.address())
            .to(contract.address)
            .data(data);
        let output = self.gateway.call(request).await?;
        contract.decode(method, &output)
    }
}
