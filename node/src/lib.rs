//! Discover an authority, get funded, and transact against its deployed program.
//!
//! [Node::bootstrap] runs the node side of the choreography:
//!
//! 1. Create a fresh [anchor_ledger::identity::Identity].
//! 2. Poll the authority's `/status` until it reports ready.
//! 3. Ask the faucet for funds.
//! 4. Confirm the funds on the ledger.
//! 5. Fetch the deployed contract.
//!
//! Once bootstrapped, a [Node] submits and reads directly against the ledger.

pub mod bootstrap;
pub mod config;
pub mod discovery;

pub use bootstrap::Node;
pub use config::Config;

use anchor_ledger::retry;
use thiserror::Error;

/// Errors that can occur while bootstrapping or transacting.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ledger: {0}")]
    Ledger(#[from] anchor_ledger::Error),
    #[error("authority unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authority failed ({status}): {message}")]
    Authority { status: u16, message: String },
    #[error("authority not serving (phase: {0})")]
    NotServing(String),
    #[error("balance not credited")]
    Unfunded,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: Box<Error> },
    #[error("stopped")]
    Stopped,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true if the authority could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Transport(_))
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
