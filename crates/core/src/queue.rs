//! The three per-account ordered queues and the invariant-preserving
//! operations over them. Ordering is by `Index`; every mutation here
//! only ever pops a strict prefix or inserts in sorted position, which
//! is what keeps invariant 1 (contiguous, gapless indices across
//! `confirmed ++ unconfirmed ++ pending`) holding after every call.

use std::collections::VecDeque;

use crate::raw_tx::RawTransaction;

#[derive(Debug, Default)]
pub struct AccountQueues {
    pub pending: VecDeque<RawTransaction>,
    pub unconfirmed: VecDeque<RawTransaction>,
    pub confirmed: Vec<RawTransaction>,
}

impl AccountQueues {
    pub fn push_pending(&mut self, raw: RawTransaction) {
        self.pending.push_back(raw);
    }

    /// Re-insert a raw regressed from `unconfirmed` (reorg) back into
    /// `pending`, keeping `pending` sorted by `Index`.
    pub fn reinsert_pending_sorted(&mut self, raw: RawTransaction) {
        let pos = self
            .pending
            .iter()
            .position(|r| r.index > raw.index)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, raw);
    }

    /// All indices across `confirmed ++ unconfirmed ++ pending`, in
    /// order — used by tests to check invariant 1/2 directly rather
    /// than trusting individual operations.
    pub fn all_indices(&self) -> Vec<u64> {
        self.confirmed
            .iter()
            .chain(self.unconfirmed.iter())
            .chain(self.pending.iter())
            .map(|r| r.index)
            .collect()
    }

    pub fn all_nonces(&self) -> Vec<u64> {
        self.confirmed
            .iter()
            .chain(self.unconfirmed.iter())
            .chain(self.pending.iter())
            .map(|r| r.nonce)
            .collect()
    }
}

/// `true` if `indices` is a contiguous, strictly increasing run (invariant 1).
pub fn is_contiguous_increasing(indices: &[u64]) -> bool {
    indices.windows(2).all(|w| w[1] == w[0] + 1)
}

/// `true` if `nonces` is strictly increasing (invariant 2).
pub fn is_strictly_increasing(nonces: &[u64]) -> bool {
    nonces.windows(2).all(|w| w[1] > w[0])
}
