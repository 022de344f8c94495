//! The raw transaction entity: an abstract outbound operation from an
//! operator subsystem, realized over time as zero or more signed
//! concrete variants sharing one nonce.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};

/// Opaque-to-the-core payload of a raw transaction: everything the
/// manager needs to build a concrete signed transaction, plus an
/// optional caption used only for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub caption: Option<String>,
}

/// A signed concrete transaction previously broadcast for a raw.
/// Distinguished from its siblings by nonce + gas price (and therefore
/// hash); all variants of one raw share `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVariant {
    pub hash: B256,
    pub nonce: u64,
    pub gas_price: u128,
    pub sent_at_block: u64,
}

#[derive(Debug, Clone)]
pub struct RawTransaction {
    /// Stable per-account monotonically increasing submission sequence.
    pub index: u64,
    /// On-chain nonce bound to this raw; may be rebound on "nonce too low".
    pub nonce: u64,
    pub from: Address,
    pub payload: Payload,
    /// Every variant previously broadcast for this raw.
    pub pending_txs: Vec<PendingVariant>,
    /// Hash of whichever variant actually landed on chain, or zero.
    pub mined_tx_hash: B256,
    pub mined_block_number: u64,
    pub mined_block_hash: B256,
    /// Set from the mined receipt's status; true means status == 0.
    pub reverted: bool,
    pub allow_revert: bool,
    pub confirmed_index: Option<u64>,
    pub last_sent_block_number: u64,
    /// Consecutive "known transaction" responses seen for this raw since
    /// the last successful send or reset.
    pub known_tx_streak: u32,
    /// Hash of the caller-declared raw payload, used for `Add` dedup.
    /// Distinct from `mined_tx_hash`.
    pub raw_hash: B256,
}

impl RawTransaction {
    pub fn new(
        index: u64,
        nonce: u64,
        from: Address,
        payload: Payload,
        allow_revert: bool,
        raw_hash: B256,
    ) -> Self {
        Self {
            index,
            nonce,
            from,
            payload,
            pending_txs: Vec::new(),
            mined_tx_hash: B256::ZERO,
            mined_block_number: 0,
            mined_block_hash: B256::ZERO,
            reverted: false,
            allow_revert,
            confirmed_index: None,
            last_sent_block_number: 0,
            known_tx_streak: 0,
            raw_hash,
        }
    }

    pub fn is_mined(&self) -> bool {
        self.mined_tx_hash != B256::ZERO
    }

    /// Regress a raw from `unconfirmed` back to `pending` after its
    /// mined variant was reorg-removed (§4.G). Clears everything that
    /// pointed at the now-stale chain position, and drops pending
    /// variants whose gas price predates the reorg so the next send
    /// attempt starts clean; `Nonce` and `Index` are untouched, since
    /// they are not chain-position-dependent.
    pub fn prepare_to_resend(&mut self) {
        self.mined_tx_hash = B256::ZERO;
        self.mined_block_number = 0;
        self.mined_block_hash = B256::ZERO;
        self.reverted = false;
        self.pending_txs.clear();
        self.last_sent_block_number = 0;
        self.known_tx_streak = 0;
    }
}

/// Hash of the caller-declared payload, used as the dedup key for
/// `Add`. Does not depend on nonce or index, so two `Add` calls with
/// the same `(from, payload)` but different nonces still collide —
/// which is exactly the duplicate-submission check in §4.D.
pub fn hash_payload(from: Address, payload: &Payload) -> B256 {
    let mut buf = Vec::with_capacity(20 + 20 + 32 + payload.data.len() + 8);
    buf.extend_from_slice(from.as_slice());
    buf.extend_from_slice(payload.to.as_slice());
    buf.extend_from_slice(&payload.value.to_be_bytes::<32>());
    buf.extend_from_slice(&payload.data);
    buf.extend_from_slice(&payload.gas_limit.to_be_bytes());
    keccak256(buf)
}
