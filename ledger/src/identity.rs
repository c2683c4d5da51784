//! Signing identities on the ledger.

use crate::{
    pipeline::{SignedEnvelope, UnsignedCall},
    Error,
};
use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
    utils::to_checksum,
};
use std::fmt;
use tokio::sync::{Mutex, MutexGuard};

/// A private key and the address it controls.
///
/// Signing is deterministic: the same [UnsignedCall] always yields the same
/// [SignedEnvelope] and transaction hash.
///
/// An [Identity] also owns the submission lock that serializes transactions
/// from its address. Share it behind an `Arc` rather than cloning key material.
pub struct Identity {
    wallet: LocalWallet,
    sequencer: Mutex<()>,
}

impl Identity {
    /// Generate a fresh identity from the operating system's entropy source.
    pub fn random() -> Self {
        Self::from_wallet(LocalWallet::new(&mut rand::thread_rng()))
    }

    /// Load an identity from a hex-encoded private key (with or without `0x`).
    pub fn from_private_key(key: &str) -> Result<Self, Error> {
        let key = key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet = key.parse::<LocalWallet>().map_err(|_| Error::InvalidKey)?;
        Ok(Self::from_wallet(wallet))
    }

    fn from_wallet(wallet: LocalWallet) -> Self {
        Self {
            wallet,
            sequencer: Mutex::new(()),
        }
    }

    /// Returns the address controlled by this identity.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Returns the canonical checksummed textual form of the address.
    pub fn checksum(&self) -> String {
        to_checksum(&self.address(), None)
    }

    /// Sign `call`, producing a raw envelope ready for broadcast.
    pub fn sign(&self, call: &UnsignedCall) -> Result<SignedEnvelope, Error> {
        let tx = call.transaction();
        let signature = self.wallet.sign_transaction_sync(&tx)?;
        Ok(SignedEnvelope::new(tx.rlp_signed(&signature)))
    }

    /// Acquire the submission lock. Held from nonce resolution until the
    /// transaction is confirmed.
    pub(crate) async fn sequence(&self) -> MutexGuard<'_, ()> {
        self.sequencer.lock().await
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.checksum())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Call;
    use ethers::{
        types::{transaction::eip2718::TypedTransaction, U256},
        utils::rlp::Rlp,
    };

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn unsigned(from: Address, nonce: u64) -> UnsignedCall {
        UnsignedCall {
            call: Call::transfer(Address::repeat_byte(0x01), U256::from(1_000u64)),
            chain_id: 1337,
            from,
            nonce: U256::from(nonce),
            gas_price: U256::from(1_000_000_000u64),
            gas: U256::from(21_000u64),
        }
    }

    #[test]
    fn test_from_private_key() {
        let identity = Identity::from_private_key(KEY).unwrap();
        assert_eq!(identity.checksum(), ADDRESS);

        let prefixed = Identity::from_private_key(&format!("0x{KEY}\n")).unwrap();
        assert_eq!(prefixed.address(), identity.address());

        assert!(matches!(
            Identity::from_private_key("not a key"),
            Err(Error::InvalidKey)
        ));
    }

    #[test]
    fn test_random_identities_are_distinct() {
        let first = Identity::random();
        let second = Identity::random();
        assert_ne!(first.address(), second.address());
    }

    #[test]
    fn test_debug_hides_key() {
        let identity = Identity::from_private_key(KEY).unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(ADDRESS));
        assert!(!debug.contains(KEY));
    }

    #[test]
    fn test_signing_is_deterministic_and_recoverable() {
        let identity = Identity::from_private_key(KEY).unwrap();
        let call = unsigned(identity.address(), 7);

        let first = identity.sign(&call).unwrap();
        let second = identity.sign(&call).unwrap();
        assert_eq!(first, second);

        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(first.raw.as_ref())).unwrap();
        assert_eq!(signature.recover(tx.sighash()).unwrap(), identity.address());
        assert_eq!(tx.nonce(), Some(&U256::from(7u64)));

        // A different nonce is a different transaction
        let other = identity.sign(&unsigned(identity.address(), 8)).unwrap();
        assert_ne!(other.hash, first.hash);
    }
}
