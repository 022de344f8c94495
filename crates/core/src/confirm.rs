//! Confirmation tracker (§4.G): `clear_queue` detects mining and moves
//! raws `pending → unconfirmed`; `confirm_queue` handles reorg-removal
//! and advances `unconfirmed → confirmed` by block depth.
//!
//! Both scans snapshot the relevant queue under a brief read lock, do
//! all backend RPC calls with no lock held, then take a brief write
//! lock to apply the result — the lock only ever guards CPU-local
//! mutation, never an `.await` on the backend, so a burst of confirm
//! passes across many accounts never serializes behind one slow RPC.
//!
//! `clear_queue` is a single consolidated pass over `pending`, adopting
//! the §9 redesign flag: the original's "mined" detection loop and its
//! second disagreeing pass over the same queue are collapsed into one.

use std::collections::VecDeque;

use alloy::primitives::Address;
use tracing::{debug, error, warn};

use crate::manager::TransactionManager;
use crate::raw_tx::RawTransaction;
use crate::store::{persist_confirmed_append, persist_queues};

impl TransactionManager {
    /// Walk `pending[addr]` in index order; for each raw, ask the
    /// backend for a receipt on any of its `PendingTxs`. Halts at the
    /// first not-yet-mined raw, preserving the strict-prefix semantics
    /// invariant 1 depends on.
    pub async fn clear_queue(&self, addr: Address) {
        let snapshot: Vec<RawTransaction> = {
            let state = self.state.read().await;
            match state.account(addr) {
                Some(account) => account.queues.pending.iter().cloned().collect(),
                None => return,
            }
        };

        let mut newly_mined = Vec::new();
        for mut raw in snapshot {
            match self.check_mined(&raw).await {
                Some((hash, block_number, block_hash, status)) => {
                    raw.mined_tx_hash = hash;
                    raw.mined_block_number = block_number;
                    raw.mined_block_hash = block_hash;
                    raw.reverted = !status;
                    if raw.reverted && !raw.allow_revert {
                        error!(%addr, index = raw.index, %hash, "raw transaction reverted and AllowRevert=false");
                    }
                    newly_mined.push(raw);
                }
                None => break,
            }
        }

        if newly_mined.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        let Some(account) = state.account_mut(addr) else { return };
        for _ in 0..newly_mined.len() {
            account.queues.pending.pop_front();
        }
        for raw in newly_mined {
            debug!(%addr, index = raw.index, hash = %raw.mined_tx_hash, "raw transaction mined, cutting gas price");
            self.gas.cut();
            account.queues.unconfirmed.push_back(raw);
        }
        persist_queues(self.store().as_ref(), addr, &account.queues.pending, &account.queues.unconfirmed);
    }

    /// `Some((hash, block_number, block_hash, status))` for the first
    /// `PendingTxs` variant with a receipt; `None` if none of them do.
    async fn check_mined(&self, raw: &RawTransaction) -> Option<(alloy::primitives::B256, u64, alloy::primitives::B256, bool)> {
        for variant in &raw.pending_txs {
            match self.backend().transaction_receipt(variant.hash).await {
                Ok(Some(receipt)) => {
                    return Some((receipt.tx_hash, receipt.block_number, receipt.block_hash, receipt.status));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "transaction_receipt RPC call failed, treating as not yet mined");
                    return None;
                }
            }
        }
        None
    }

    /// Reorg-removal pass over `unconfirmed[addr]`, then a depth-based
    /// advance of the (possibly shortened) prefix into `confirmed[addr]`.
    pub async fn confirm_queue(&self, addr: Address) {
        self.detect_reorgs(addr).await;
        self.advance_confirmations(addr).await;
    }

    async fn detect_reorgs(&self, addr: Address) {
        let snapshot: Vec<RawTransaction> = {
            let state = self.state.read().await;
            match state.account(addr) {
                Some(account) => account.queues.unconfirmed.iter().cloned().collect(),
                None => return,
            }
        };
        if snapshot.is_empty() {
            return;
        }

        let mut still_mined = Vec::with_capacity(snapshot.len());
        let mut removed = Vec::new();
        for mut raw in snapshot {
            let canonical = self.backend().block_hash_at(raw.mined_block_number).await.ok().flatten();
            if canonical == Some(raw.mined_block_hash) {
                still_mined.push(raw);
            } else {
                warn!(%addr, index = raw.index, block = raw.mined_block_number, "mined variant reorg-removed, regressing to pending");
                raw.prepare_to_resend();
                removed.push(raw);
            }
        }

        if removed.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        let Some(account) = state.account_mut(addr) else { return };
        account.queues.unconfirmed = VecDeque::from(still_mined);
        for raw in removed {
            account.queues.reinsert_pending_sorted(raw);
        }
        persist_queues(self.store().as_ref(), addr, &account.queues.pending, &account.queues.unconfirmed);
    }

    async fn advance_confirmations(&self, addr: Address) {
        let current_block = self.current_block_number();
        let confirmation = self.config.confirmation;

        let snapshot: Vec<RawTransaction> = {
            let state = self.state.read().await;
            match state.account(addr) {
                Some(account) => account.queues.unconfirmed.iter().cloned().collect(),
                None => return,
            }
        };

        let mut newly_confirmed = Vec::new();
        for raw in snapshot {
            let depth = current_block.saturating_sub(raw.mined_block_number);
            if depth >= confirmation {
                newly_confirmed.push(raw);
            } else {
                break;
            }
        }

        if newly_confirmed.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        let Some(account) = state.account_mut(addr) else { return };
        for _ in 0..newly_confirmed.len() {
            account.queues.unconfirmed.pop_front();
        }
        for mut raw in newly_confirmed {
            let j = account.num_confirmed;
            raw.confirmed_index = Some(j);
            account.num_confirmed += 1;
            debug!(%addr, index = raw.index, confirmed_index = j, "raw transaction confirmed");
            persist_confirmed_append(self.store().as_ref(), addr, j, &raw);
            account.queues.confirmed.push(raw);
        }
        persist_queues(self.store().as_ref(), addr, &account.queues.pending, &account.queues.unconfirmed);
    }
}
