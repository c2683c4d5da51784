//! Join an authority's deployment and transact against it.

use crate::{discovery::Discovery, Config, Error};
use anchor_ledger::{
    artifact::DeployedContract,
    gateway::{Gateway, Receipt, Rpc},
    identity::Identity,
    pipeline::{Call, Pipeline},
    signal::Signal,
};
use ethers::{
    abi::Token,
    types::{Address, U256},
    utils::to_checksum,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::info;

/// Returns true if the ledger could not be reached (directly, or after the
/// gateway exhausted its own retries).
fn ledger_unavailable(err: &Error) -> bool {
    match err {
        Error::Ledger(err) => {
            err.is_transient() || matches!(err, anchor_ledger::Error::Exhausted { .. })
        }
        _ => false,
    }
}

/// A funded participant holding the deployed contract.
pub struct Node<R: Rpc> {
    pipeline: Pipeline<R>,
    contract: DeployedContract,
    submitted: AtomicUsize,
}

impl<R: Rpc> Node<R> {
    /// Create a fresh identity, wait for the authority, get funded, and fetch
    /// the deployed contract.
    pub async fn bootstrap(rpc: R, config: &Config, stopped: Signal) -> Result<Self, Error> {
        let identity = Arc::new(Identity::random());
        let address = identity.address();
        info!(address = %identity.checksum(), "created identity");
        let discovery = Discovery::new(config.authority_url.clone(), config.request_timeout)?;
        let gateway = Gateway::new(rpc, config.gateway.clone(), stopped.clone());
        let pipeline = Pipeline::new(identity, gateway, config.pipeline.clone());

        // Wait for the authority to serve
        let waiting = |err: &Error| {
            err.is_unreachable() || matches!(err, Error::NotServing(_) | Error::Authority { .. })
        };
        config
            .discovery
            .execute(&stopped, waiting, || async {
                let status = discovery.status().await?;
                if !status.ready {
                    return Err(Error::NotServing(status.phase));
                }
                Ok(())
            })
            .await?;
        info!("authority serving");

        // Ask for funds. An answer from the authority (even a failure) is final.
        let funded = config
            .faucet
            .execute(&stopped, Error::is_unreachable, || {
                discovery.request_funds(address)
            })
            .await?;
        info!(hash = ?funded.transaction, amount = %funded.amount, "faucet transferred");

        // Confirm the funds on the ledger
        let unfunded = |err: &Error| ledger_unavailable(err) || matches!(err, Error::Unfunded);
        let balance = config
            .funding
            .execute(&stopped, unfunded, || async {
                let balance = pipeline.gateway().balance(address).await?;
                if balance.is_zero() {
                    return Err(Error::Unfunded);
                }
                Ok(balance)
            })
            .await?;
        info!(%balance, "funds confirmed");

        // Fetch the deployed contract
        let retrievable =
            |err: &Error| err.is_unreachable() || matches!(err, Error::Authority { .. });
        let contract = config
            .contract
            .execute(&stopped, retrievable, || discovery.contract())
            .await?;
        info!(contract = %to_checksum(&contract.address, None), "fetched contract");

        Ok(Self {
            pipeline,
            contract,
            submitted: AtomicUsize::new(0),
        })
    }

    pub fn address(&self) -> Address {
        self.pipeline.identity().address()
    }

    pub fn contract(&self) -> &DeployedContract {
        &self.contract
    }

    /// Invoke `method` with `args`, attaching `value`, and wait for confirmation.
    pub async fn submit(&self, method: &str, args: &[Token], value: U256) -> Result<Receipt, Error> {
        let call = Call::method(&self.contract, method, args)?.with_value(value);
        let receipt = self.pipeline.submit(call).await?;
        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(receipt)
    }

    /// Invoke read-only `method` with `args`.
    pub async fn read(&self, method: &str, args: &[Token]) -> Result<Vec<Token>, Error> {
        Ok(self.pipeline.read(&self.contract, method, args).await?)
    }

    /// Confirmed balance of this node.
    pub async fn balance(&self) -> Result<U256, Error> {
        Ok(self.pipeline.gateway().balance(self.address()).await?)
    }

    /// Number of submissions from this node that were confirmed.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }
}
