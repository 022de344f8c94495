//! Keystore backed by in-process `alloy` local signers.
//!
//! Only the signing half — submission is the backend's job, not the
//! keystore's, so a raw signed transaction is handed back rather than a
//! broadcast receipt.

use std::collections::HashMap;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, TxKind};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::keystore::{Keystore, KeystoreError, SignedTx, UnsignedTx};

/// A keystore holding a fixed set of local private keys.
///
/// Production deployments that need HSM- or remote-signer-backed
/// accounts implement [`Keystore`] directly; this type only covers the
/// common "operator holds its own keys" case.
pub struct AlloyKeystore {
    signers: HashMap<Address, PrivateKeySigner>,
}

impl AlloyKeystore {
    pub fn new() -> Self {
        Self {
            signers: HashMap::new(),
        }
    }

    /// Add an account from a hex-encoded private key (with or without
    /// a `0x` prefix).
    pub fn add_key(&mut self, private_key: &str) -> Result<Address, KeystoreError> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| KeystoreError::Signing(format!("invalid private key: {e}")))?;
        let address = signer.address();
        self.signers.insert(address, signer);
        Ok(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers.keys().copied().collect()
    }
}

impl Default for AlloyKeystore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Keystore for AlloyKeystore {
    fn has_address(&self, account: Address) -> bool {
        self.signers.contains_key(&account)
    }

    async fn sign_tx(&self, account: Address, tx: UnsignedTx) -> Result<SignedTx, KeystoreError> {
        let signer = self
            .signers
            .get(&account)
            .ok_or(KeystoreError::UnknownAccount(account))?;

        // The raw's gas price is legacy-style (single price); carry it
        // as both max_fee and priority fee so the signed envelope is a
        // valid EIP-1559 transaction on chains that no longer accept
        // legacy transactions.
        let mut unsigned = TxEip1559 {
            chain_id: tx.chain_id,
            nonce: tx.nonce,
            gas_limit: tx.gas_limit,
            max_fee_per_gas: tx.gas_price,
            max_priority_fee_per_gas: tx.gas_price,
            to: TxKind::Call(tx.to),
            value: tx.value,
            input: tx.data,
            access_list: Default::default(),
        };

        let signature = signer
            .sign_transaction_sync(&mut unsigned)
            .map_err(|e| KeystoreError::Signing(e.to_string()))?;
        let envelope: TxEnvelope = unsigned.into_signed(signature).into();
        let hash = *envelope.tx_hash();
        let raw = envelope.encoded_2718();

        Ok(SignedTx {
            raw: raw.into(),
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn signs_with_known_account() {
        let mut ks = AlloyKeystore::new();
        let addr = ks.add_key(TEST_KEY).unwrap();
        assert!(ks.has_address(addr));

        let tx = UnsignedTx {
            to: Address::ZERO,
            value: Default::default(),
            data: Default::default(),
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            nonce: 0,
            chain_id: 1,
        };
        let signed = ks.sign_tx(addr, tx).await.unwrap();
        assert!(!signed.raw.is_empty());
        assert_ne!(signed.hash, Default::default());
    }

    #[tokio::test]
    async fn rejects_unknown_account() {
        let ks = AlloyKeystore::new();
        let tx = UnsignedTx {
            to: Address::ZERO,
            value: Default::default(),
            data: Default::default(),
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            nonce: 0,
            chain_id: 1,
        };
        let err = ks.sign_tx(Address::ZERO, tx).await.unwrap_err();
        assert!(matches!(err, KeystoreError::UnknownAccount(_)));
    }
}
