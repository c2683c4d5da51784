//! Reach the ledger with bounded retries and explicit failure classification.
//!
//! [Rpc] is the raw boundary: one method per ledger query, each issued exactly
//! once. [Gateway] wraps an [Rpc] with the retry behavior every caller needs:
//!
//! * Readiness probes, reads, and broadcasts are retried only on transient
//!   failures ([Error::is_transient]). A rejection by the ledger is returned
//!   after a single attempt.
//! * Receipts are polled until one appears or a timeout elapses.
//! * Every loop is abandoned once the shutdown [Signal] resolves.

use crate::{retry::Policy, signal::Signal, units::millis, Error, NZUsize};
use ethers::types::{Address, Bytes, TransactionReceipt, TransactionRequest, H256, U256};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{debug, info, warn};

pub mod http;

/// Messages returned by ledgers when an identical envelope is already pooled.
const KNOWN_TRANSACTION: [&str; 2] = ["already known", "known transaction"];

/// Outcome of a confirmed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub success: bool,
    pub transaction_hash: H256,
    pub block_hash: Option<H256>,
    pub block_number: Option<u64>,
    /// Set when the transaction created a contract.
    pub contract_address: Option<Address>,
    /// Full receipt as reported by the ledger.
    pub raw: serde_json::Value,
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        let raw = serde_json::to_value(&receipt).unwrap_or(serde_json::Value::Null);
        Self {
            success: receipt.status.map(|status| status.as_u64() == 1).unwrap_or(false),
            transaction_hash: receipt.transaction_hash,
            block_hash: receipt.block_hash,
            block_number: receipt.block_number.map(|number| number.as_u64()),
            contract_address: receipt.contract_address,
            raw,
        }
    }
}

/// Raw queries against the ledger.
///
/// Implementations issue each request once and classify failures: transport
/// problems become [Error::Transport] or [Error::Status], while errors reported
/// by the ledger itself become [Error::Rejected].
pub trait Rpc: Clone + Send + Sync + 'static {
    /// Accounts managed by the ledger. Used as a readiness probe.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, Error>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Confirmed balance of `address`.
    fn balance(&self, address: Address) -> impl Future<Output = Result<U256, Error>> + Send;

    /// Confirmed number of transactions sent by `address`.
    fn transaction_count(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<U256, Error>> + Send;

    fn estimate_gas(
        &self,
        request: TransactionRequest,
    ) -> impl Future<Output = Result<U256, Error>> + Send;

    /// Broadcast a signed envelope, returning the hash the ledger assigned it.
    fn send_raw_transaction(&self, raw: Bytes)
        -> impl Future<Output = Result<H256, Error>> + Send;

    /// Receipt of `hash`, or `None` if it is not yet confirmed.
    fn transaction_receipt(
        &self,
        hash: H256,
    ) -> impl Future<Output = Result<Option<Receipt>, Error>> + Send;

    /// Execute a read-only call against the latest state.
    fn call(&self, request: TransactionRequest)
        -> impl Future<Output = Result<Bytes, Error>> + Send;
}

/// Configuration for a [Gateway].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Retry behavior while waiting for the ledger to answer probes.
    pub readiness: Policy,
    /// Retry behavior for read-only queries.
    pub read: Policy,
    /// Retry behavior for broadcasts.
    pub submit: Policy,
    /// Delay between receipt polls.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            readiness: Policy::new(NZUsize!(20), Duration::from_secs(10)),
            read: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            submit: Policy::new(NZUsize!(3), Duration::from_secs(4)),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// An [Rpc] with retries, receipt polling, and shutdown handling.
#[derive(Clone)]
pub struct Gateway<R: Rpc> {
    rpc: R,
    config: Config,
    stopped: Signal,
}

impl<R: Rpc> Gateway<R> {
    /// Create a new [Gateway].
    pub fn new(rpc: R, config: Config, stopped: Signal) -> Self {
        Self {
            rpc,
            config,
            stopped,
        }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// Block until the ledger answers a probe, retrying on transient failures.
    ///
    /// Any successful HTTP exchange counts as reachable, including one that
    /// carries a JSON-RPC error or a body that cannot be decoded.
    pub async fn wait_until_ready(&self) -> Result<(), Error> {
        self.config
            .readiness
            .execute(&self.stopped, Error::is_transient, || async {
                match self.rpc.accounts().await {
                    Ok(accounts) => {
                        debug!(accounts = accounts.len(), "probe answered");
                        Ok(())
                    }
                    Err(err @ (Error::Rejected { .. } | Error::InvalidResponse(_))) => {
                        debug!(error = %err, "probe answered with an error");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;
        info!("ledger reachable");
        Ok(())
    }

    pub async fn chain_id(&self) -> Result<u64, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || self.rpc.chain_id())
            .await?)
    }

    /// Confirmed balance of `address`. Repeated calls without intervening
    /// transactions return the same value.
    pub async fn balance(&self, address: Address) -> Result<U256, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || {
                self.rpc.balance(address)
            })
            .await?)
    }

    /// Confirmed transaction count of `address`, used as the next nonce.
    pub async fn transaction_count(&self, address: Address) -> Result<U256, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || {
                self.rpc.transaction_count(address)
            })
            .await?)
    }

    pub async fn estimate_gas(&self, request: TransactionRequest) -> Result<U256, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || {
                self.rpc.estimate_gas(request.clone())
            })
            .await?)
    }

    /// Broadcast `envelope`, retrying on transient failures.
    ///
    /// A lost response may mean the envelope was accepted anyway. Because the
    /// envelope is identical on every attempt, a ledger that reports it as
    /// already known has accepted this very transaction.
    pub async fn submit(&self, envelope: &crate::pipeline::SignedEnvelope) -> Result<H256, Error> {
        Ok(self
            .config
            .submit
            .execute(&self.stopped, Error::is_transient, || async {
                match self.rpc.send_raw_transaction(envelope.raw.clone()).await {
                    Err(Error::Rejected { message, .. })
                        if KNOWN_TRANSACTION
                            .iter()
                            .any(|known| message.contains(known)) =>
                    {
                        debug!(hash = ?envelope.hash, "envelope already known");
                        Ok(envelope.hash)
                    }
                    result => result,
                }
            })
            .await?)
    }

    /// Receipt of `hash` if it is already confirmed.
    pub async fn receipt(&self, hash: H256) -> Result<Option<Receipt>, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || {
                self.rpc.transaction_receipt(hash)
            })
            .await?)
    }

    /// Poll for the receipt of `hash` until it appears or `timeout` elapses.
    ///
    /// Transient failures while polling are tolerated until the deadline.
    pub async fn await_receipt(&self, hash: H256, timeout: Duration) -> Result<Receipt, Error> {
        let poll = async {
            loop {
                match self.rpc.transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(err) if err.is_transient() => {
                        warn!(?hash, error = %err, "receipt poll failed");
                    }
                    Err(err) => return Err(err),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        };
        tokio::select! {
            biased;
            _ = self.stopped.clone() => Err(Error::Stopped),
            result = tokio::time::timeout(timeout, poll) => {
                result.unwrap_or(Err(Error::ReceiptTimeout(hash)))
            }
        }
    }

    /// Execute a read-only call.
    pub async fn call(&self, request: TransactionRequest) -> Result<Bytes, Error> {
        Ok(self
            .config
            .read
            .execute(&self.stopped, Error::is_transient, || {
                self.rpc.call(request.clone())
            })
            .await?)
    }
}
