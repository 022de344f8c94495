//! The `Keystore` contract: a signing oracle the manager never owns the
//! private keys of directly.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use thiserror::Error;

/// A transaction the manager wants signed. Gas price and nonce are
/// filled in by the send engine before signing; the keystore does not
/// choose either.
#[derive(Debug, Clone)]
pub struct UnsignedTx {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub nonce: u64,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    /// RLP-encoded signed transaction, ready for `send_transaction`.
    pub raw: Bytes,
    pub hash: B256,
}

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("account {0} is not known to the keystore")]
    UnknownAccount(Address),
    #[error("account {0} is locked: {1}")]
    Locked(Address, String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[async_trait]
pub trait Keystore: Send + Sync {
    fn has_address(&self, account: Address) -> bool;

    async fn sign_tx(&self, account: Address, tx: UnsignedTx) -> Result<SignedTx, KeystoreError>;
}
