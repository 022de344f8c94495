//! In-memory mirror of everything `queueLock` protects (§5): the three
//! queues, `nonce`, and `addresses` for every managed account.
//! `currentBlockNumber` lives in the manager's `watch::Receiver` instead
//! of here — every reader already goes through
//! [`crate::manager::TransactionManager::current_block_number`], and a
//! `watch` channel gives lock-free reads without a second source of
//! truth to keep in sync. One `QueueState` is held behind a single
//! `tokio::sync::RwLock` inside the manager — async because mutation is
//! interleaved with RPC `.await` points in the send/confirm paths, which
//! rules out a `parking_lot` lock — that family is reserved for
//! CPU-local critical sections elsewhere in this workspace (see
//! [`crate::gas`]), never ones that cross an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::Mutex as AsyncMutex;

use crate::queue::AccountQueues;

/// Everything the manager tracks for one account beyond the queues
/// themselves: the dedup index, the submission counter, and the
/// per-account send lock (§5's `raw.sendLock`, simplified to one lock
/// per account since only the current head-of-pending is ever sent at
/// a time — see DESIGN.md).
pub struct AccountEntry {
    pub address: Address,
    pub nonce: u64,
    /// Total raws ever added for this account (`numRaw[addr]`).
    pub num_raw: u64,
    /// `numConfirmed[addr]`.
    pub num_confirmed: u64,
    /// `rawHash[addr][hash] -> index`, for `Add` dedup.
    pub raw_hash_index: HashMap<B256, u64>,
    pub queues: AccountQueues,
    pub send_lock: Arc<AsyncMutex<()>>,
}

impl AccountEntry {
    pub fn new(address: Address, nonce: u64) -> Self {
        Self {
            address,
            nonce,
            num_raw: 0,
            num_confirmed: 0,
            raw_hash_index: HashMap::new(),
            queues: AccountQueues::default(),
            send_lock: Arc::new(AsyncMutex::new(())),
        }
    }
}

#[derive(Default)]
pub struct QueueState {
    /// Ordered by account index, matching `addr[i]` in the persistence
    /// schema; position in this `Vec` *is* `i`.
    pub accounts: Vec<AccountEntry>,
    pub addr_index: HashMap<Address, usize>,
}

impl QueueState {
    pub fn account(&self, addr: Address) -> Option<&AccountEntry> {
        let i = *self.addr_index.get(&addr)?;
        self.accounts.get(i)
    }

    pub fn account_mut(&mut self, addr: Address) -> Option<&mut AccountEntry> {
        let i = *self.addr_index.get(&addr)?;
        self.accounts.get_mut(i)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address).collect()
    }

    /// Register a new account at the next free index. Returns its
    /// index, or the existing index if already registered (idempotent,
    /// so callers don't need to check first).
    pub fn register(&mut self, address: Address, nonce: u64) -> usize {
        if let Some(&i) = self.addr_index.get(&address) {
            return i;
        }
        let i = self.accounts.len();
        self.accounts.push(AccountEntry::new(address, nonce));
        self.addr_index.insert(address, i);
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let mut state = QueueState::default();
        let addr = Address::repeat_byte(0x01);
        let i1 = state.register(addr, 0);
        let i2 = state.register(addr, 5);
        assert_eq!(i1, i2);
        assert_eq!(state.account(addr).unwrap().nonce, 0);
    }

    #[test]
    fn account_mut_is_none_for_unregistered_address() {
        let mut state = QueueState::default();
        assert!(state.account_mut(Address::repeat_byte(0x02)).is_none());
    }
}
