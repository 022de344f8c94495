//! Single-raw send (§4.E): sign → submit → interpret the already-
//! classified [`SendOutcome`] → retry/bump/adjust-nonce.
//!
//! "Nonce too low" and "replacement transaction underpriced" both
//! resolve by retrying: refresh state, then try again. This is written
//! as a plain `loop` instead of recursion for both cases, so there is
//! no unreachable trailing statement after a resubmission path returns.
//!
//! A successful submit is not itself proof of visibility: the node can
//! accept a transaction and still fail to show it back via
//! `transaction_by_hash` (dropped from the mempool, routed to a peer
//! that never propagated it). That check happens right after submit;
//! a miss bumps gas and retries, same as a "known transaction" or an
//! unclassified send error.

use alloy::primitives::{Address, B256};
use tracing::{debug, info, warn};

use txmgr_chain::{BlockTag, SendOutcome, UnsignedTx};

use crate::manager::TransactionManager;
use crate::raw_tx::PendingVariant;
use crate::store::persist_queues;

/// Outcome of one `send_head_of_pending` call, surfaced to the tick
/// loop for logging; transient cases are already logged internally and
/// never propagate as an `Err`.
#[derive(Debug, PartialEq, Eq)]
pub enum SendAttempt {
    NoPending,
    AlreadyMined(B256),
    Throttled,
    Sent(B256),
    Idempotent(B256),
    InsufficientFunds,
    KnownTransaction,
    Other(String),
}

impl TransactionManager {
    /// Serialized by the account's `send_lock`: at most one send
    /// attempt for this account's head-of-pending raw runs at a time.
    pub async fn send_head_of_pending(&self, addr: Address) -> Result<SendAttempt, crate::errors::ManagerError> {
        let send_lock = {
            let state = self.state.read().await;
            match state.account(addr) {
                Some(account) => account.send_lock.clone(),
                None => return Ok(SendAttempt::NoPending),
            }
        };
        let _guard = send_lock.lock().await;

        loop {
            let raw = {
                let state = self.state.read().await;
                match state.account(addr).and_then(|a| a.queues.pending.front()) {
                    Some(raw) => raw.clone(),
                    None => return Ok(SendAttempt::NoPending),
                }
            };

            if raw.is_mined() {
                return Ok(SendAttempt::AlreadyMined(raw.mined_tx_hash));
            }

            let current_block = self.current_block_number();
            if raw.last_sent_block_number != 0
                && current_block.saturating_sub(raw.last_sent_block_number) < self.config.send_delay_blocks
            {
                self.update_pending_head(addr, |r| r.last_sent_block_number = current_block)
                    .await;
                return Ok(SendAttempt::Throttled);
            }

            let gas_price = self.gas.current();
            let unsigned = UnsignedTx {
                to: raw.payload.to,
                value: raw.payload.value,
                data: raw.payload.data.clone(),
                gas_limit: raw.payload.gas_limit,
                gas_price,
                nonce: raw.nonce,
                chain_id: self.config.chain_id,
            };

            let signed = self.keystore().sign_tx(addr, unsigned).await?;

            let already_sent = raw.pending_txs.iter().any(|v| v.hash == signed.hash);
            if already_sent {
                return Ok(SendAttempt::Idempotent(signed.hash));
            }

            self.update_pending_head(addr, |r| {
                r.pending_txs.push(PendingVariant {
                    hash: signed.hash,
                    nonce: raw.nonce,
                    gas_price,
                    sent_at_block: current_block,
                });
                r.last_sent_block_number = current_block;
            })
            .await;

            match self.backend().send_transaction(signed.raw).await {
                Err(e) => {
                    warn!(%addr, error = %e, "send_transaction RPC call failed, next tick retries");
                    return Ok(SendAttempt::Other(e.to_string()));
                }
                Ok(SendOutcome::Submitted(hash)) => {
                    match self.backend().transaction_by_hash(hash).await? {
                        Some(_) => {
                            info!(%addr, %hash, nonce = raw.nonce, %gas_price, "raw transaction submitted");
                            return Ok(SendAttempt::Sent(hash));
                        }
                        None => {
                            let bumped = self.gas.bump();
                            warn!(%addr, %hash, new_gas_price = bumped, "submitted tx not found by the node, bumping gas and retrying");
                            continue;
                        }
                    }
                }
                Ok(SendOutcome::InsufficientFunds) => {
                    warn!(%addr, index = raw.index, "insufficient funds, will keep retrying every tick");
                    return Ok(SendAttempt::InsufficientFunds);
                }
                Ok(SendOutcome::ReplaceUnderpriced) => {
                    let bumped = self.gas.bump();
                    debug!(%addr, new_gas_price = bumped, "underpriced, bumped gas and retrying");
                    continue;
                }
                Ok(SendOutcome::KnownTransaction) => {
                    let streak = self
                        .update_pending_head(addr, |r| {
                            r.known_tx_streak += 1;
                            r.known_tx_streak
                        })
                        .await;
                    self.gas.bump();

                    if streak >= self.config.max_num_known_tx {
                        self.update_pending_head(addr, |r| r.known_tx_streak = 0).await;
                        return Ok(SendAttempt::KnownTransaction);
                    }

                    let mut head_rx = self.new_head_bcast.subscribe();
                    tokio::select! {
                        _ = head_rx.recv() => {}
                        _ = self.cancel_token().cancelled() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    }
                    return Ok(SendAttempt::KnownTransaction);
                }
                Ok(SendOutcome::NonceTooLow) => {
                    let fresh_nonce = self.backend().nonce_at(addr, BlockTag::Latest).await?;
                    self.rebind_nonce(addr, fresh_nonce).await;
                    continue;
                }
                Ok(SendOutcome::Other(message)) => {
                    self.gas.bump();
                    warn!(%addr, %message, "send rejected for an unclassified reason");
                    return Ok(SendAttempt::Other(message));
                }
            }
        }
    }

    /// Mutate the head-of-pending raw in place and persist both queues.
    /// Returns whatever `f` returns, so callers can read back a field
    /// (e.g. the post-increment known-tx streak) without a second lock
    /// round trip.
    async fn update_pending_head<T>(&self, addr: Address, f: impl FnOnce(&mut crate::raw_tx::RawTransaction) -> T) -> T {
        let mut state = self.state.write().await;
        let account = state.account_mut(addr).expect("account vanished under lock");
        let result = f(account.queues.pending.front_mut().expect("head-of-pending vanished under lock"));
        persist_queues(self.store().as_ref(), addr, &account.queues.pending, &account.queues.unconfirmed);
        result
    }

    /// Rebind `raw.Nonce` after a "nonce too low" response, and persist
    /// the refreshed `AddrNonce` so invariant 5 holds across restart.
    async fn rebind_nonce(&self, addr: Address, fresh_nonce: u64) {
        let mut state = self.state.write().await;
        let account = state.account_mut(addr).expect("account vanished under lock");
        if let Some(raw) = account.queues.pending.front_mut() {
            raw.nonce = fresh_nonce;
        }
        if account.nonce < fresh_nonce {
            account.nonce = fresh_nonce;
        }
        crate::store::persist_nonce(self.store().as_ref(), addr, account.nonce);
        persist_queues(self.store().as_ref(), addr, &account.queues.pending, &account.queues.unconfirmed);
        warn!(%addr, fresh_nonce, "nonce too low, rebinding to provider nonce");
    }
}
