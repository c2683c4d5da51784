//! Bring the authority from an unreachable ledger to serving nodes.

use crate::{
    compiler::{self, Compiler},
    Config, Error,
};
use anchor_ledger::{
    artifact::{ContractArtifact, DeployedContract},
    gateway::{Gateway, Receipt, Rpc},
    identity::Identity,
    pipeline::{Call, Pipeline},
    signal::Signal,
    wire::{BalanceResponse, FaucetResponse, Status},
};
use ethers::{
    types::{Address, H256, U256},
    utils::{format_units, to_checksum},
};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, OnceLock,
    },
};
use tracing::info;

/// Bootstrap progress. Phases only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NotReady,
    LedgerReachable,
    Funded,
    Compiled,
    Deployed,
    Serving,
}

impl Phase {
    const ALL: [Phase; 6] = [
        Phase::NotReady,
        Phase::LedgerReachable,
        Phase::Funded,
        Phase::Compiled,
        Phase::Deployed,
        Phase::Serving,
    ];

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(Phase::NotReady)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotReady => "not_ready",
            Phase::LedgerReachable => "ledger_reachable",
            Phase::Funded => "funded",
            Phase::Compiled => "compiled",
            Phase::Deployed => "deployed",
            Phase::Serving => "serving",
        };
        f.write_str(name)
    }
}

/// Owns the program, deploys it, and hands out funds and its descriptor.
///
/// Shared behind an `Arc` between the bootstrap task and the REST surface.
pub struct Authority<R: Rpc> {
    pipeline: Pipeline<R>,
    config: Config,
    stopped: Signal,

    phase: AtomicU8,
    contract: OnceLock<DeployedContract>,
}

impl<R: Rpc> Authority<R> {
    /// Create a new [Authority] that signs with `identity`.
    pub fn new(rpc: R, identity: Arc<Identity>, config: Config, stopped: Signal) -> Self {
        let gateway = Gateway::new(rpc, config.gateway.clone(), stopped.clone());
        let pipeline = Pipeline::new(identity, gateway, config.pipeline.clone());
        Self {
            pipeline,
            config,
            stopped,
            phase: AtomicU8::new(Phase::NotReady as u8),
            contract: OnceLock::new(),
        }
    }

    /// Create a new [Authority] whose private key is read from the environment
    /// variable named by [Config::secret_env].
    pub fn from_env(rpc: R, config: Config, stopped: Signal) -> Result<Self, Error> {
        let secret = std::env::var(&config.secret_env)
            .map_err(|_| Error::MissingSecret(config.secret_env.clone()))?;
        let identity = Identity::from_private_key(&secret)?;
        Ok(Self::new(rpc, Arc::new(identity), config, stopped))
    }

    pub fn identity(&self) -> &Arc<Identity> {
        self.pipeline.identity()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_index(self.phase.load(Ordering::Acquire))
    }

    pub fn status(&self) -> Status {
        let phase = self.phase();
        Status {
            ready: phase == Phase::Serving,
            phase: phase.to_string(),
        }
    }

    /// Returns the deployed contract once serving.
    pub fn contract(&self) -> Result<DeployedContract, Error> {
        match (self.phase(), self.contract.get()) {
            (Phase::Serving, Some(contract)) => Ok(contract.clone()),
            (phase, _) => Err(Error::NotServing(phase)),
        }
    }

    fn advance(&self, phase: Phase) {
        self.phase.fetch_max(phase as u8, Ordering::AcqRel);
        info!(%phase, "advanced");
    }

    /// Run every bootstrap transition in order, returning the deployed contract.
    ///
    /// On failure the phase stays at the last completed transition.
    pub async fn bootstrap<C: Compiler>(&self, compiler: &C) -> Result<DeployedContract, Error> {
        info!(address = %self.identity().checksum(), "starting bootstrap");

        // Wait for the ledger
        self.pipeline.gateway().wait_until_ready().await?;
        self.advance(Phase::LedgerReachable);

        // Confirm the authority can pay for deployment
        let balance = self.ensure_funded().await?;
        info!(%balance, "authority funded");
        self.advance(Phase::Funded);

        // Compile
        let artifact = compiler.compile().await?;
        if let Some(path) = &self.config.artifact_path {
            compiler::persist(&artifact, path).await?;
        }
        self.advance(Phase::Compiled);

        // Deploy
        let contract = self.deploy(artifact).await?;
        let contract = self.contract.get_or_init(|| contract).clone();
        self.advance(Phase::Deployed);

        self.advance(Phase::Serving);
        Ok(contract)
    }

    async fn ensure_funded(&self) -> Result<U256, Error> {
        let address = self.identity().address();
        let minimum: U256 = self.config.min_balance.into();
        let retryable = |err: &Error| err.is_transient() || matches!(err, Error::Unfunded { .. });
        Ok(self
            .config
            .funding
            .execute(&self.stopped, retryable, || async move {
                let balance = self.pipeline.gateway().balance(address).await?;
                if balance < minimum {
                    return Err(Error::Unfunded { balance, minimum });
                }
                Ok(balance)
            })
            .await?)
    }

    async fn deploy(&self, artifact: ContractArtifact) -> Result<DeployedContract, Error> {
        let call = Call::deploy(&artifact, &[], self.config.deploy_value.into())?;

        // A pending deployment leaves the nonce unchanged, so a retry rebuilds the same envelope.
        // Once it lands the nonce moves, so its receipt is checked before rebuilding.
        let retryable = |err: &Error| {
            err.is_transient()
                || matches!(
                    err,
                    Error::Ledger(anchor_ledger::Error::ReceiptTimeout(_))
                )
        };
        let timed_out = Mutex::new(None);
        let receipt = self
            .config
            .deploy
            .execute(&self.stopped, retryable, || {
                self.deploy_attempt(&call, &timed_out)
            })
            .await?;
        let address = receipt
            .contract_address
            .ok_or(Error::MissingAddress(receipt.transaction_hash))?;
        info!(
            address = %to_checksum(&address, None),
            hash = ?receipt.transaction_hash,
            "deployed contract"
        );
        Ok(artifact.deployed(address))
    }

    /// Submit `call` once, unless the deployment whose receipt window elapsed
    /// (`timed_out`) has been confirmed since.
    async fn deploy_attempt(
        &self,
        call: &Call,
        timed_out: &Mutex<Option<H256>>,
    ) -> Result<Receipt, Error> {
        let earlier = timed_out.lock().ok().and_then(|hash| *hash);
        if let Some(hash) = earlier {
            if let Some(receipt) = self.pipeline.gateway().receipt(hash).await? {
                if !receipt.success {
                    return Err(anchor_ledger::Error::Reverted(hash).into());
                }
                info!(?hash, "earlier deployment confirmed");
                return Ok(receipt);
            }
        }
        match self.pipeline.submit(call.clone()).await {
            Err(anchor_ledger::Error::ReceiptTimeout(hash)) => {
                if let Ok(mut slot) = timed_out.lock() {
                    *slot = Some(hash);
                }
                Err(anchor_ledger::Error::ReceiptTimeout(hash).into())
            }
            result => Ok(result?),
        }
    }

    /// Transfer the configured faucet amount to `address`.
    ///
    /// Only transient failures are retried. A rejection (for example,
    /// insufficient funds) is returned to the caller.
    pub async fn fund(&self, address: Address) -> Result<FaucetResponse, Error> {
        let phase = self.phase();
        if phase != Phase::Serving {
            return Err(Error::NotServing(phase));
        }
        let amount = self.config.faucet_amount;
        let receipt = self
            .config
            .faucet
            .execute(&self.stopped, Error::is_transient, || async {
                Ok::<_, Error>(
                    self.pipeline
                        .submit(Call::transfer(address, amount.into()))
                        .await?,
                )
            })
            .await?;
        let recipient = to_checksum(&address, None);
        info!(address = %recipient, %amount, hash = ?receipt.transaction_hash, "funded node");
        Ok(FaucetResponse {
            message: format!("transferred {amount} to {recipient}"),
            transaction: receipt.transaction_hash,
            amount: amount.into(),
        })
    }

    /// Look up the confirmed balance of `address`.
    pub async fn balance(&self, address: Address) -> Result<BalanceResponse, Error> {
        let balance = self.pipeline.gateway().balance(address).await?;
        Ok(BalanceResponse {
            address: to_checksum(&address, None),
            balance,
            balance_eth: format_units(balance, "ether").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Precompiled;
    use anchor_ledger::{
        mocks::{self, Ledger},
        signal::Signaler,
        units::Amount,
    };
    use anchor_macros::test_traced;
    use ethers::utils::get_contract_address;
    use std::time::Duration;

    /// Always fails to compile.
    struct Broken;

    impl Compiler for Broken {
        async fn compile(&self) -> Result<ContractArtifact, Error> {
            Err(Error::Compilation("ParserError: expected ';'".into()))
        }
    }

    fn config() -> Config {
        Config {
            artifact_path: None,
            ..Config::default()
        }
    }

    fn authority(ledger: &Ledger, signal: Signal) -> Authority<Ledger> {
        Authority::new(
            ledger.clone(),
            Arc::new(Identity::random()),
            config(),
            signal,
        )
    }

    fn fund(ledger: &Ledger, authority: &Authority<Ledger>) {
        ledger.fund(authority.identity().address(), Amount::ether(10_000).into());
    }

    #[test_traced]
    fn test_bootstrap_to_serving() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            assert_eq!(authority.phase(), Phase::NotReady);
            assert!(!authority.status().ready);
            assert!(matches!(
                authority.contract(),
                Err(Error::NotServing(Phase::NotReady))
            ));

            let contract = authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            let expected = get_contract_address(authority.identity().address(), 0u64);
            assert_eq!(contract.address, expected);
            assert_eq!(ledger.balance_of(expected), Amount::ether(3).into());
            assert_eq!(authority.phase(), Phase::Serving);
            assert_eq!(
                authority.status(),
                Status {
                    ready: true,
                    phase: "serving".into()
                }
            );
            assert_eq!(authority.contract().unwrap(), contract);
        });
    }

    #[test_traced]
    fn test_waits_for_funding() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);

            // Funds arrive between the second and third balance checks
            let address = authority.identity().address();
            let funder = ledger.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(6)).await;
                funder.fund(address, Amount::ether(10).into());
            });

            authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            assert_eq!(authority.phase(), Phase::Serving);
        });
    }

    #[test_traced]
    fn test_unfunded_stays_reachable() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);

            let result = authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await;
            match result {
                Err(Error::Exhausted { attempts, last }) => {
                    assert_eq!(attempts, 3);
                    assert!(matches!(*last, Error::Unfunded { .. }));
                }
                other => panic!("unexpected result: {:?}", other),
            }
            assert_eq!(authority.phase(), Phase::LedgerReachable);
            assert!(!authority.status().ready);
        });
    }

    #[test_traced]
    fn test_compile_failure_is_fatal() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);

            let result = authority.bootstrap(&Broken).await;
            assert!(matches!(result, Err(Error::Compilation(_))));
            assert_eq!(authority.phase(), Phase::Funded);
            assert_eq!(ledger.submissions(), 0);
            assert!(!authority.status().ready);
        });
    }

    #[test_traced]
    fn test_rejected_deployment_is_fatal() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            ledger.reject_next("exceeds block gas limit");

            let result = authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await;
            assert!(matches!(
                result,
                Err(Error::Ledger(anchor_ledger::Error::Rejected { .. }))
            ));
            assert_eq!(ledger.submissions(), 1);
            assert_eq!(authority.phase(), Phase::Compiled);
        });
    }

    #[test_traced]
    fn test_reverted_deployment_is_fatal() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            ledger.revert_next();

            let result = authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await;
            assert!(matches!(
                result,
                Err(Error::Ledger(anchor_ledger::Error::Reverted(_)))
            ));
            assert_eq!(ledger.submissions(), 1);
            assert_eq!(authority.phase(), Phase::Compiled);
        });
    }

    #[test_traced]
    fn test_slow_deployment_is_resubmitted_once() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);

            // The receipt outlasts the first receipt window
            ledger.delay_receipts(25);

            let contract = authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            assert_eq!(ledger.submissions(), 2);
            assert_eq!(ledger.history().len(), 1);
            assert_eq!(
                contract.address,
                get_contract_address(authority.identity().address(), 0u64)
            );
        });
    }

    #[test_traced]
    fn test_deployment_landing_after_timeout_is_not_repeated() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            ledger.withhold_receipts();

            // Include the deployment after its receipt window, before the retry
            let mine = async {
                tokio::time::sleep(Duration::from_secs(22)).await;
                ledger.mine_pending();
            };
            let precompiled = Precompiled::Artifact(mocks::artifact());
            let (result, _) = tokio::join!(authority.bootstrap(&precompiled), mine);
            let contract = result.unwrap();
            assert_eq!(ledger.submissions(), 1);
            assert_eq!(ledger.history().len(), 1);
            assert_eq!(
                contract.address,
                get_contract_address(authority.identity().address(), 0u64)
            );
            assert_eq!(ledger.nonce_of(authority.identity().address()), 1);
        });
    }

    #[test_traced]
    fn test_bootstrap_persists_artifact() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let dir = std::env::temp_dir().join(format!("anchor-bootstrap-{}", std::process::id()));
            let path = dir.join("compiled.json");
            let authority = Authority::new(
                ledger.clone(),
                Arc::new(Identity::random()),
                Config {
                    artifact_path: Some(path.clone()),
                    ..Config::default()
                },
                signal,
            );
            fund(&ledger, &authority);

            authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            let written = tokio::fs::read(&path).await.unwrap();
            let artifact: ContractArtifact = serde_json::from_slice(&written).unwrap();
            assert_eq!(artifact, mocks::artifact());

            tokio::fs::remove_dir_all(&dir).await.unwrap();
        });
    }

    #[test_traced]
    fn test_probe_error_object_counts_as_reachable() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            ledger.reject_probes(1);

            authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            assert_eq!(ledger.probes(), 1);
            assert_eq!(authority.phase(), Phase::Serving);
        });
    }

    #[test_traced]
    fn test_faucet_requires_serving() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);

            let result = authority.fund(Address::random()).await;
            assert!(matches!(result, Err(Error::NotServing(Phase::NotReady))));
            assert_eq!(ledger.submissions(), 0);
        });
    }

    #[test_traced]
    fn test_faucet_transfers_configured_amount() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();

            let node = Address::random();
            let response = authority.fund(node).await.unwrap();
            assert_eq!(response.amount, Amount::ether(500).into());
            assert_eq!(ledger.balance_of(node), Amount::ether(500).into());
            assert!(response.message.contains(&to_checksum(&node, None)));

            let balance = authority.balance(node).await.unwrap();
            assert_eq!(balance.balance, Amount::ether(500).into());
            assert_eq!(balance.balance_eth, "500.000000000000000000");
        });
    }

    #[test_traced]
    fn test_faucet_rejection_is_surfaced() {
        let executor = mocks::deterministic();
        executor.block_on(async {
            let (_signaler, signal) = Signaler::new();
            let ledger = Ledger::new();
            let authority = authority(&ledger, signal);
            fund(&ledger, &authority);
            authority
                .bootstrap(&Precompiled::Artifact(mocks::artifact()))
                .await
                .unwrap();
            let before = ledger.submissions();

            ledger.reject_next("insufficient funds for gas * price + value");
            let result = authority.fund(Address::random()).await;
            assert!(matches!(
                result,
                Err(Error::Ledger(anchor_ledger::Error::Rejected { .. }))
            ));
            assert_eq!(ledger.submissions(), before + 1);
        });
    }

    #[test]
    fn test_missing_secret() {
        let (_signaler, signal) = Signaler::new();
        let config = Config {
            secret_env: "ANCHOR_TEST_UNSET_SECRET".into(),
            ..config()
        };
        let result = Authority::from_env(Ledger::new(), config, signal);
        assert!(matches!(result, Err(Error::MissingSecret(name)) if name == "ANCHOR_TEST_UNSET_SECRET"));
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::NotReady < Phase::LedgerReachable);
        assert!(Phase::Deployed < Phase::Serving);
        assert_eq!(Phase::from_index(Phase::Compiled as u8), Phase::Compiled);
        assert_eq!(Phase::LedgerReachable.to_string(), "ledger_reachable");
    }
}
