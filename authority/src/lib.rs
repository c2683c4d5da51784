//! Deploy a ledger-resident program and distribute funds and its descriptor to nodes.
//!
//! An [Authority] walks a strictly ordered bootstrap before it serves anyone:
//!
//! ```txt
//! NotReady -> LedgerReachable -> Funded -> Compiled -> Deployed -> Serving
//! ```
//!
//! Each transition is network-fallible and retried under its own
//! [anchor_ledger::retry::Policy]. A failed transition leaves the phase at the
//! last completed step. Once [Phase::Serving] is reached, [server] exposes the
//! deployed contract and a faucet to nodes over REST.

pub mod bootstrap;
pub mod compiler;
pub mod config;
pub mod server;

pub use bootstrap::{Authority, Phase};
pub use config::Config;

use anchor_ledger::retry;
use ethers::types::{H256, U256};
use thiserror::Error;

/// Errors that can occur while bootstrapping or serving.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ledger: {0}")]
    Ledger(#[from] anchor_ledger::Error),
    #[error("missing secret: {0} is not set")]
    MissingSecret(String),
    #[error("unfunded: balance {balance} is below {minimum}")]
    Unfunded { balance: U256, minimum: U256 },
    #[error("compilation failed: {0}")]
    Compilation(String),
    #[error("deployment receipt has no contract address: {0:?}")]
    MissingAddress(H256),
    #[error("not serving (phase: {0})")]
    NotServing(Phase),
    #[error("exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: Box<Error> },
    #[error("stopped")]
    Stopped,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true if the ledger could not be reached (directly, or after the
    /// gateway exhausted its own retries).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Ledger(err) => {
                err.is_transient() || matches!(err, anchor_ledger::Error::Exhausted { .. })
            }
            _ => false,
        }
    }
}

impl From<retry::Error<Error>> for Error {
    fn from(err: retry::Error<Error>) -> Self {
        match err {
            retry::Error::Exhausted { attempts, last } => Error::Exhausted {
                attempts,
                last: Box::new(last),
            },
            retry::Error::Aborted(err) => err,
            retry::Error::Stopped => Error::Stopped,
        }
    }
}
