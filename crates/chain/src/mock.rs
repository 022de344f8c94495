//! In-memory [`RootChainBackend`]/[`Keystore`] pair used by the manager's
//! test suite. The mock backend and mock keystore agree on a private,
//! non-RLP encoding for "signed" transactions — they are only ever
//! used together, never against a real node.

use std::collections::{HashMap, HashSet, VecDeque};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::backend::{
    BackendError, BlockTag, HeadStream, ReceiptInfo, RootChainBackend, SendOutcome, TxInfo,
};
use crate::keystore::{Keystore, KeystoreError, SignedTx, UnsignedTx};

#[derive(Debug, Clone)]
struct MockPayload {
    from: Address,
    nonce: u64,
    gas_price: u128,
    to: Address,
    value: U256,
    data: Bytes,
}

impl MockPayload {
    fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(20 + 8 + 16 + 20 + 32 + 4 + self.data.len());
        buf.extend_from_slice(self.from.as_slice());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.gas_price.to_be_bytes());
        buf.extend_from_slice(self.to.as_slice());
        buf.extend_from_slice(&self.value.to_be_bytes::<32>());
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        Bytes::from(buf)
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let mut off = 0usize;
        let from = Address::from_slice(raw.get(off..off + 20)?);
        off += 20;
        let nonce = u64::from_be_bytes(raw.get(off..off + 8)?.try_into().ok()?);
        off += 8;
        let gas_price = u128::from_be_bytes(raw.get(off..off + 16)?.try_into().ok()?);
        off += 16;
        let to = Address::from_slice(raw.get(off..off + 20)?);
        off += 20;
        let value = U256::from_be_slice(raw.get(off..off + 32)?);
        off += 32;
        let len = u32::from_be_bytes(raw.get(off..off + 4)?.try_into().ok()?) as usize;
        off += 4;
        let data = Bytes::copy_from_slice(raw.get(off..off + len)?);
        Some(Self {
            from,
            nonce,
            gas_price,
            to,
            value,
            data,
        })
    }

    fn hash(&self) -> B256 {
        keccak256(self.encode())
    }
}

/// A keystore that "signs" by deterministically hashing the transaction
/// fields. No real cryptography — only for exercising the manager's
/// send path without a live signer.
#[derive(Default)]
pub struct MockKeystore {
    known: Mutex<HashSet<Address>>,
}

impl MockKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, addr: Address) {
        self.known.lock().insert(addr);
    }
}

#[async_trait]
impl Keystore for MockKeystore {
    fn has_address(&self, account: Address) -> bool {
        self.known.lock().contains(&account)
    }

    async fn sign_tx(&self, account: Address, tx: UnsignedTx) -> Result<SignedTx, KeystoreError> {
        if !self.has_address(account) {
            return Err(KeystoreError::UnknownAccount(account));
        }
        let payload = MockPayload {
            from: account,
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            to: tx.to,
            value: tx.value,
            data: tx.data,
        };
        let hash = payload.hash();
        Ok(SignedTx {
            raw: payload.encode(),
            hash,
        })
    }
}

#[derive(Clone)]
struct SubmittedTx {
    #[allow(dead_code)]
    from: Address,
    #[allow(dead_code)]
    nonce: u64,
}

#[derive(Default)]
struct Inner {
    nonces: HashMap<Address, u64>,
    submitted: HashMap<B256, SubmittedTx>,
    receipts: HashMap<B256, ReceiptInfo>,
    canonical: HashMap<u64, B256>,
    head: u64,
    hash_counter: u64,
    scripted_outcomes: VecDeque<SendOutcome>,
    invisible_after_submit: u64,
}

/// In-memory root-chain backend. Every method the trait requires is
/// backed by a plain `HashMap` guarded by one lock — adequate for tests
/// that never need more throughput than a handful of accounts.
pub struct MockBackend {
    inner: Mutex<Inner>,
    head_tx: broadcast::Sender<u64>,
    chain_id: u64,
}

impl MockBackend {
    pub fn new(chain_id: u64) -> Self {
        let (head_tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(Inner::default()),
            head_tx,
            chain_id,
        }
    }

    pub fn set_nonce(&self, addr: Address, nonce: u64) {
        self.inner.lock().nonces.insert(addr, nonce);
    }

    pub fn nonce(&self, addr: Address) -> u64 {
        *self.inner.lock().nonces.get(&addr).unwrap_or(&0)
    }

    /// Advance the head and notify every subscriber, as a real new-head
    /// event would.
    pub fn advance_head(&self, number: u64) {
        self.inner.lock().head = number;
        let _ = self.head_tx.send(number);
    }

    pub fn head(&self) -> u64 {
        self.inner.lock().head
    }

    /// Queue a one-shot classified outcome for the next `send_transaction`
    /// call instead of the default "accept and register" behavior. Used
    /// to script provider failures in tests (underpriced, known tx,
    /// nonce too low, ...).
    pub fn queue_outcome(&self, outcome: SendOutcome) {
        self.inner.lock().scripted_outcomes.push_back(outcome);
    }

    /// Make the next `times` calls to `transaction_by_hash` report the
    /// tx as not found, regardless of whether it was actually submitted
    /// — simulates a node that accepted a tx but can't show it back yet.
    pub fn hide_after_submit(&self, times: u64) {
        self.inner.lock().invisible_after_submit = times;
    }

    /// Mark `hash` as mined at `block_number` with the given status,
    /// registering that block as canonical if this is its first mention.
    pub fn mine(&self, hash: B256, block_number: u64, status: bool) {
        let mut inner = self.inner.lock();
        let block_hash = match inner.canonical.get(&block_number) {
            Some(h) => *h,
            None => {
                inner.hash_counter += 1;
                let h = keccak256(inner.hash_counter.to_be_bytes());
                inner.canonical.insert(block_number, h);
                h
            }
        };
        inner.receipts.insert(
            hash,
            ReceiptInfo {
                tx_hash: hash,
                block_number,
                block_hash,
                status,
            },
        );
    }

    /// Simulate a reorg at `block_number`: its canonical hash changes,
    /// so any receipt previously mined against the old hash no longer
    /// matches canonical history.
    pub fn reorg_block(&self, block_number: u64) {
        let mut inner = self.inner.lock();
        inner.hash_counter += 1;
        let h = keccak256(inner.hash_counter.to_be_bytes());
        inner.canonical.insert(block_number, h);
    }
}

#[async_trait]
impl RootChainBackend for MockBackend {
    async fn chain_id(&self) -> Result<u64, BackendError> {
        Ok(self.chain_id)
    }

    async fn nonce_at(&self, addr: Address, _tag: BlockTag) -> Result<u64, BackendError> {
        Ok(self.nonce(addr))
    }

    async fn send_transaction(&self, signed_raw: Bytes) -> Result<SendOutcome, BackendError> {
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.scripted_outcomes.pop_front() {
            return Ok(outcome);
        }
        let payload = MockPayload::decode(&signed_raw)
            .ok_or_else(|| BackendError::Rpc("malformed mock payload".to_string()))?;
        let hash = payload.hash();
        inner.submitted.insert(
            hash,
            SubmittedTx {
                from: payload.from,
                nonce: payload.nonce,
            },
        );
        Ok(SendOutcome::Submitted(hash))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, BackendError> {
        Ok(self.inner.lock().receipts.get(&hash).cloned())
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxInfo>, BackendError> {
        let mut inner = self.inner.lock();
        if inner.invisible_after_submit > 0 {
            inner.invisible_after_submit -= 1;
            return Ok(None);
        }
        if !inner.submitted.contains_key(&hash) {
            return Ok(None);
        }
        let pending = !inner.receipts.contains_key(&hash);
        Ok(Some(TxInfo { hash, pending }))
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<B256>, BackendError> {
        Ok(self.inner.lock().canonical.get(&number).copied())
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, BackendError> {
        let rx = self.head_tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(n) => return Some((n, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn round_trips_a_submission() {
        let backend = MockBackend::new(1337);
        let keystore = MockKeystore::new();
        let addr = Address::repeat_byte(0x11);
        keystore.add_account(addr);

        let tx = UnsignedTx {
            to: Address::repeat_byte(0x22),
            value: U256::ZERO,
            data: Bytes::new(),
            gas_limit: 21_000,
            gas_price: 10,
            nonce: 0,
            chain_id: 1337,
        };
        let signed = keystore.sign_tx(addr, tx).await.unwrap();
        let outcome = backend.send_transaction(signed.raw).await.unwrap();
        assert_eq!(outcome, SendOutcome::Submitted(signed.hash));

        assert!(backend
            .transaction_by_hash(signed.hash)
            .await
            .unwrap()
            .unwrap()
            .pending);

        backend.mine(signed.hash, 100, true);
        let receipt = backend.transaction_receipt(signed.hash).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 100);
        assert!(receipt.status);
    }

    #[tokio::test]
    async fn reorg_changes_canonical_block_hash() {
        let backend = MockBackend::new(1);
        let hash = B256::repeat_byte(0xaa);
        backend.mine(hash, 50, true);
        let receipt = backend.transaction_receipt(hash).await.unwrap().unwrap();
        let original_block_hash = backend.block_hash_at(50).await.unwrap().unwrap();
        assert_eq!(receipt.block_hash, original_block_hash);

        backend.reorg_block(50);
        let new_block_hash = backend.block_hash_at(50).await.unwrap().unwrap();
        assert_ne!(new_block_hash, original_block_hash);
    }

    #[tokio::test]
    async fn queued_outcome_preempts_default_success() {
        let backend = MockBackend::new(1);
        backend.queue_outcome(SendOutcome::ReplaceUnderpriced);

        let keystore = MockKeystore::new();
        let addr = Address::repeat_byte(0x01);
        keystore.add_account(addr);
        let tx = UnsignedTx {
            to: Address::ZERO,
            value: U256::ZERO,
            data: Bytes::new(),
            gas_limit: 21_000,
            gas_price: 5,
            nonce: 0,
            chain_id: 1,
        };
        let signed = keystore.sign_tx(addr, tx).await.unwrap();
        let outcome = backend.send_transaction(signed.raw).await.unwrap();
        assert_eq!(outcome, SendOutcome::ReplaceUnderpriced);
    }

    #[tokio::test]
    async fn head_subscription_delivers_advanced_heads() {
        let backend = MockBackend::new(1);
        let mut stream = backend.subscribe_new_heads().await.unwrap();
        backend.advance_head(5);
        assert_eq!(stream.next().await, Some(5));
        backend.advance_head(6);
        assert_eq!(stream.next().await, Some(6));
    }
}
