//! Submit, confirm, and read transactions against an Ethereum-style ledger.
//!
//! The ledger is an opaque remote system reached only through JSON-RPC. Everything
//! that talks to it goes through a [gateway::Gateway], which layers bounded
//! retries ([retry::Policy]) over a raw [gateway::Rpc] boundary and classifies
//! every failure as either transient (worth another attempt) or terminal.
//!
//! On top of the gateway, a [pipeline::Pipeline] turns a logical [pipeline::Call]
//! into a signed, broadcast, and confirmed transaction:
//!
//! ```txt
//! Call -> (nonce, chain id, gas) -> UnsignedCall -> sign -> SignedEnvelope -> broadcast -> Receipt
//! ```
//!
//! # Nonce discipline
//!
//! The ledger does not coordinate nonces on behalf of a caller. The pipeline reads
//! the confirmed transaction count of the sender for every call and never caches
//! it. Concurrent submissions from one [identity::Identity] would otherwise read
//! the same nonce, so each identity carries a submission lock that the pipeline
//! holds from nonce resolution until the receipt arrives: at most one transaction
//! per identity is ever in flight.
//!
//! # Shutdown
//!
//! Every retry loop and receipt poll races against a [signal::Signal]. Once it
//! resolves, in-flight operations return [Error::Stopped]. Transactions that were
//! already broadcast are not rolled back; after a restart, state is re-derived
//! from the ledger.

pub mod artifact;
pub mod gateway;
pub mod identity;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod pipeline;
pub mod retry;
pub mod signal;
pub mod units;
pub mod wire;

use ethers::types::H256;
use thiserror::Error;

/// Create a [std::num::NonZeroUsize], panicking if the value is zero.
#[macro_export]
macro_rules! NZUsize {
    ($val:expr) => {
        ::core::num::NonZeroUsize::new($val).expect("value must be non-zero")
    };
}

/// Errors that can occur when interacting with the ledger.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("receipt not available before timeout: {0:?}")]
    ReceiptTimeout(H256),
    #[error("transaction reverted: {0:?}")]
    Reverted(H256),
    #[error("exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: Box<Error> },
    #[error("stopped")]
    Stopped,
    #[error("invalid private key")]
    InvalidKey,
    #[error("signing failed: {0}")]
    Signing(#[from] ethers::signers::WalletError),
    #[error("abi: {0}")]
    Abi(#[from] ethers::abi::Error),
    #[error("missing constructor for deployment with arguments")]
    MissingConstructor,
}

impl Error {
    /// Returns true if the failure happened at the transport layer (connection
    /// failure, timeout, or non-2xx response) and the request is worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Status(_))
    }

    /// Returns true if the ledger itself refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. } | Error::Reverted(_))
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
