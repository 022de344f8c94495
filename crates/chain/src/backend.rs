//! The `RootChainBackend` contract: everything the send and confirmation
//! paths need from an Ethereum-like root chain, abstracted behind a
//! trait so the core never leaks a concrete client type (alloy, a mock,
//! or anything else a caller wires in).

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use thiserror::Error;

/// A stream of new head block numbers, as delivered by a `NewHead`
/// subscription. Items arrive in increasing order; the stream ends
/// only when the underlying subscription is dropped.
pub type HeadStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Block tag used by `nonce_at`. The manager only ever needs `Latest`,
/// but the type keeps the door open for `Pending` without widening the
/// trait's surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// Minimal transaction receipt the confirmation tracker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    /// `true` if the receipt's status field is 1 (success).
    pub status: bool,
}

/// Minimal transaction-by-hash response; used only to detect a variant
/// that is still sitting in the mempool (`pending == true`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub hash: B256,
    pub pending: bool,
}

/// The result of attempting to submit a signed transaction, already
/// classified out of the provider's raw error text. Everything except
/// `Submitted` corresponds to one row of the error-substring table in
/// the send engine design: classification happens here, once, so the
/// send engine itself only ever matches on a closed enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted the transaction; this is its hash. Not a
    /// claim that it is mined.
    Submitted(B256),
    /// "insufficient funds…" — surfaced to the caller, not retried.
    InsufficientFunds,
    /// "replacement transaction underpriced" / "transaction underpriced".
    ReplaceUnderpriced,
    /// "known transaction" — the node already has this tx in its mempool.
    KnownTransaction,
    /// "nonce too low" / "nonce is too low".
    NonceTooLow,
    /// Anything else the provider said; preserved for logging.
    Other(String),
}

/// Classify a provider error message into a [`SendOutcome`]. Case-insensitive
/// substring match, kept as a free function so it is unit-testable in
/// isolation from any live provider.
pub fn classify_send_error(message: &str) -> SendOutcome {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") {
        SendOutcome::InsufficientFunds
    } else if lower.contains("replacement transaction underpriced") || lower.contains("transaction underpriced") {
        SendOutcome::ReplaceUnderpriced
    } else if lower.contains("known transaction") {
        SendOutcome::KnownTransaction
    } else if lower.contains("nonce too low") || lower.contains("nonce is too low") {
        SendOutcome::NonceTooLow
    } else {
        SendOutcome::Other(message.to_string())
    }
}

/// The RPC contract expected of the root chain. Implementations must
/// tolerate concurrent calls from every account's send/confirm workers.
#[async_trait]
pub trait RootChainBackend: Send + Sync {
    async fn chain_id(&self) -> Result<u64, BackendError>;

    async fn nonce_at(&self, addr: Address, tag: BlockTag) -> Result<u64, BackendError>;

    /// Submit an already-signed raw transaction. Transaction-level
    /// failures (underpriced, known, nonce too low, ...) are reported
    /// as `Ok(SendOutcome::...)`, not `Err` — only genuine RPC/transport
    /// failure is an `Err`.
    async fn send_transaction(&self, signed_raw: Bytes) -> Result<SendOutcome, BackendError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, BackendError>;

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxInfo>, BackendError>;

    /// Canonical block hash at `number`, or `None` if the chain has not
    /// reached that height (or has reorged below it). Used by the
    /// confirmation tracker to detect that a previously-mined variant's
    /// block is no longer canonical.
    async fn block_hash_at(&self, number: u64) -> Result<Option<B256>, BackendError>;

    /// Subscribe to new head block numbers. Reconnection on failure is
    /// the header tracker's job, not the backend's — this call either
    /// succeeds with a live stream or fails once.
    async fn subscribe_new_heads(&self) -> Result<HeadStream, BackendError>;
}
