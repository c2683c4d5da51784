//! A simulated ledger and runtimes for exercising ledger clients in tests.
//!
//! [Ledger] implements [Rpc] entirely in memory. It decodes every broadcast
//! envelope, recovers the signer, and enforces the same rules a real ledger
//! would (chain id, nonce ordering, sufficient balance), so clients are tested
//! against the behavior they will meet in production. Failure injection knobs
//! cover transport outages, lost responses, rejections, reverts, and slow or
//! missing receipts.

use crate::{
    artifact::ContractArtifact,
    gateway::{Receipt, Rpc},
    Error,
};
use ethers::{
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, NameOrAddress,
        TransactionRequest, H256, U256,
    },
    utils::{get_contract_address, keccak256, rlp::Rlp},
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::runtime::{Builder, Runtime};

/// Chain id reported by [Ledger].
pub const CHAIN_ID: u64 = 1337;

/// Gas charged for a plain transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Gas charged for invoking a contract method.
pub const CALL_GAS: u64 = 60_000;

/// Gas charged for creating a contract.
pub const DEPLOY_GAS: u64 = 250_000;

/// Interface of a contract that stores a list of strings.
pub const STORE_ABI: &str = r#"[
    {"type": "constructor", "inputs": [], "stateMutability": "payable"},
    {"type": "function", "name": "addStr", "inputs": [{"name": "value", "type": "string"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "getStrList", "inputs": [], "outputs": [{"name": "", "type": "string[]"}], "stateMutability": "view"}
]"#;

const STORE_BYTECODE: &str = "0x6080604052348015600f57600080fd5b50603f80601d6000396000f3fe";

/// Returns a compiled artifact for the string store.
pub fn artifact() -> ContractArtifact {
    ContractArtifact::new(
        serde_json::from_str(STORE_ABI).expect("valid abi"),
        STORE_BYTECODE.parse().expect("valid bytecode"),
    )
}

/// A single-threaded runtime with paused time. Sleeps complete as soon as the
/// runtime is otherwise idle, so retry schedules run instantly while elapsed
/// time is still observable through [tokio::time::Instant].
pub fn deterministic() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("failed to build runtime")
}

/// A multi-threaded runtime on wall-clock time, for tests that use real sockets.
pub fn realtime() -> Runtime {
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

/// A transaction the [Ledger] has included.
#[derive(Clone, Debug, PartialEq)]
pub struct Included {
    pub hash: H256,
    pub from: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub success: bool,
    pub contract_address: Option<Address>,
}

struct Pending {
    from: Address,
    nonce: u64,
    to: Option<Address>,
    value: U256,
    fee: U256,
    revert: bool,
    polls: usize,
}

#[derive(Default)]
struct State {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    pending: HashMap<H256, Pending>,
    receipts: HashMap<H256, Receipt>,
    history: Vec<Included>,
    calls: Vec<TransactionRequest>,
    call_output: Bytes,
    block: u64,

    probes: usize,
    submissions: usize,

    probe_failures: usize,
    probe_rejections: usize,
    read_failures: usize,
    lost_responses: usize,
    reject_next: Option<String>,
    revert_next: bool,
    receipt_delay: usize,
    withhold_receipts: bool,
}

impl State {
    fn include(&mut self, hash: H256, pending: Pending) -> Receipt {
        let Pending {
            from,
            nonce,
            to,
            value,
            fee,
            revert,
            ..
        } = pending;
        self.block += 1;
        *self.nonces.entry(from).or_default() += 1;

        // Fees are always charged, value only moves on success
        let debit = if revert { fee } else { fee + value };
        let balance = self.balances.entry(from).or_default();
        *balance = balance.saturating_sub(debit);
        let contract_address = match (to, revert) {
            (None, false) => Some(get_contract_address(from, nonce)),
            _ => None,
        };
        if !revert {
            if let Some(recipient) = to.or(contract_address) {
                *self.balances.entry(recipient).or_default() += value;
            }
        }

        let receipt = Receipt {
            success: !revert,
            transaction_hash: hash,
            block_hash: Some(H256::from_low_u64_be(self.block)),
            block_number: Some(self.block),
            contract_address,
            raw: json!({
                "transactionHash": hash,
                "blockNumber": self.block,
                "from": from,
                "to": to,
                "contractAddress": contract_address,
                "status": if revert { "0x0" } else { "0x1" },
            }),
        };
        self.receipts.insert(hash, receipt.clone());
        self.history.push(Included {
            hash,
            from,
            nonce,
            to,
            value,
            success: !revert,
            contract_address,
        });
        receipt
    }

    fn pending_from(&self, from: Address) -> u64 {
        self.pending.values().filter(|p| p.from == from).count() as u64
    }

    fn fail_read(&mut self) -> Result<(), Error> {
        if self.read_failures > 0 {
            self.read_failures -= 1;
            return Err(Error::Status(503));
        }
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> Error {
    Error::Rejected {
        code: -32000,
        message: message.into(),
    }
}

fn gas_for(create: bool, data: &[u8]) -> u64 {
    if create {
        DEPLOY_GAS
    } else if data.is_empty() {
        TRANSFER_GAS
    } else {
        CALL_GAS
    }
}

/// An in-memory ledger.
#[derive(Clone, Default)]
pub struct Ledger {
    state: Arc<Mutex<State>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("ledger state poisoned")
    }

    /// Credit `amount` to `address`.
    pub fn fund(&self, address: Address, amount: U256) {
        *self.state().balances.entry(address).or_default() += amount;
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Confirmed transaction count of `address`.
    pub fn nonce_of(&self, address: Address) -> u64 {
        self.state().nonces.get(&address).copied().unwrap_or_default()
    }

    /// Transactions included so far, in order.
    pub fn history(&self) -> Vec<Included> {
        self.state().history.clone()
    }

    /// Read-only calls received so far.
    pub fn calls(&self) -> Vec<TransactionRequest> {
        self.state().calls.clone()
    }

    /// Number of readiness probes received.
    pub fn probes(&self) -> usize {
        self.state().probes
    }

    /// Number of broadcasts received, including rejected ones.
    pub fn submissions(&self) -> usize {
        self.state().submissions
    }

    /// Answer the next `n` probes with a 503.
    pub fn fail_probes(&self, n: usize) {
        self.state().probe_failures = n;
    }

    /// Answer the next `n` probes with a JSON-RPC error object.
    pub fn reject_probes(&self, n: usize) {
        self.state().probe_rejections = n;
    }

    /// Answer the next `n` balance, nonce, or call queries with a 503.
    pub fn fail_reads(&self, n: usize) {
        self.state().read_failures = n;
    }

    /// Apply the next `n` broadcasts but answer them with a 503.
    pub fn drop_broadcast_responses(&self, n: usize) {
        self.state().lost_responses = n;
    }

    /// Reject the next broadcast with `message`.
    pub fn reject_next(&self, message: &str) {
        self.state().reject_next = Some(message.to_string());
    }

    /// Include the next transaction as failed.
    pub fn revert_next(&self) {
        self.state().revert_next = true;
    }

    /// Report each future receipt only after `polls` unsuccessful polls.
    pub fn delay_receipts(&self, polls: usize) {
        self.state().receipt_delay = polls;
    }

    /// Never include future transactions.
    pub fn withhold_receipts(&self) {
        self.state().withhold_receipts = true;
    }

    /// Include every pending transaction, in nonce order, even while receipts
    /// are withheld.
    pub fn mine_pending(&self) {
        let mut state = self.state();
        let mut pending: Vec<_> = state.pending.drain().collect();
        pending.sort_by_key(|(_, pending)| (pending.from, pending.nonce));
        for (hash, pending) in pending {
            state.include(hash, pending);
        }
    }

    /// Answer read-only calls with `output`.
    pub fn respond_to_calls(&self, output: Bytes) {
        self.state().call_output = output;
    }
}

impl Rpc for Ledger {
    async fn accounts(&self) -> Result<Vec<Address>, Error> {
        let mut state = self.state();
        state.probes += 1;
        if state.probe_failures > 0 {
            state.probe_failures -= 1;
            return Err(Error::Status(503));
        }
        if state.probe_rejections > 0 {
            state.probe_rejections -= 1;
            return Err(Error::Rejected {
                code: -32601,
                message: "the method eth_accounts does not exist/is not available".into(),
            });
        }
        Ok(Vec::new())
    }

    async fn chain_id(&self) -> Result<u64, Error> {
        Ok(CHAIN_ID)
    }

    async fn balance(&self, address: Address) -> Result<U256, Error> {
        let mut state = self.state();
        state.fail_read()?;
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, Error> {
        let mut state = self.state();
        state.fail_read()?;
        Ok(state.nonces.get(&address).copied().unwrap_or_default().into())
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> Result<U256, Error> {
        let data = request.data.unwrap_or_default();
        Ok(gas_for(request.to.is_none(), &data).into())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, Error> {
        let mut state = self.state();
        state.submissions += 1;

        // Decode and authenticate
        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .map_err(|err| rejected(format!("invalid transaction: {err}")))?;
        let from = signature
            .recover(tx.sighash())
            .map_err(|err| rejected(format!("invalid signature: {err}")))?;
        let hash = H256::from(keccak256(&raw));
        if state.pending.contains_key(&hash) || state.receipts.contains_key(&hash) {
            return Err(rejected("already known"));
        }
        if let Some(message) = state.reject_next.take() {
            return Err(rejected(message));
        }
        if tx.chain_id().map(|id| id.as_u64()) != Some(CHAIN_ID) {
            return Err(rejected("invalid chain id"));
        }

        // Enforce ordering
        let nonce = tx.nonce().copied().unwrap_or_default().as_u64();
        let confirmed = state.nonces.get(&from).copied().unwrap_or_default();
        let next = confirmed + state.pending_from(from);
        if nonce < confirmed {
            return Err(rejected("nonce too low"));
        }
        if nonce < next {
            return Err(rejected("replacement transaction underpriced"));
        }
        if nonce > next {
            return Err(rejected("nonce too high"));
        }

        // Enforce funding
        let to = tx.to().and_then(NameOrAddress::as_address).copied();
        let value = tx.value().copied().unwrap_or_default();
        let limit = tx.gas().copied().unwrap_or_default();
        let price = tx.gas_price().unwrap_or_default();
        let data = tx.data().cloned().unwrap_or_default();
        let used = U256::from(gas_for(to.is_none(), &data));
        if limit < used {
            return Err(rejected("intrinsic gas too low"));
        }
        let balance = state.balances.get(&from).copied().unwrap_or_default();
        if balance < value + limit * price {
            return Err(rejected("insufficient funds for gas * price + value"));
        }

        let pending = Pending {
            from,
            nonce,
            to,
            value,
            fee: used * price,
            revert: std::mem::take(&mut state.revert_next),
            polls: state.receipt_delay,
        };
        if pending.polls == 0 && !state.withhold_receipts {
            state.include(hash, pending);
        } else {
            state.pending.insert(hash, pending);
        }

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(Error::Status(503));
        }
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: H256) -> Result<Option<Receipt>, Error> {
        let mut state = self.state();
        if let Some(receipt) = state.receipts.get(&hash) {
            return Ok(Some(receipt.clone()));
        }
        if state.withhold_receipts {
            return Ok(None);
        }
        let Some(pending) = state.pending.get_mut(&hash) else {
            return Ok(None);
        };
        if pending.polls > 0 {
            pending.polls -= 1;
            return Ok(None);
        }
        let pending = state.pending.remove(&hash).expect("pending transaction");
        Ok(Some(state.include(hash, pending)))
    }

    async fn call(&self, request: TransactionRequest) -> Result<Bytes, Error> {
        let mut state = self.state();
        state.fail_read()?;
        state.calls.push(request);
        Ok(state.call_output.clone())
    }
}
