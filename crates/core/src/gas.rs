//! Process-wide gas price controller (§4.C). One operator, one chain,
//! one price: intentionally global state, but owned by the manager
//! rather than held in a module-level static.
//!
//! A single clamped value behind a `parking_lot::Mutex`, since every
//! critical section here is a pure arithmetic clamp with no `.await`
//! inside it — a synchronous lock is the right tool, not the async
//! `tokio` one.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::{decode_u128, encode_u128, key_gas_price, KvStore};

pub struct GasPriceController {
    current: Mutex<u128>,
    min: u128,
    max: u128,
    store: Arc<dyn KvStore>,
}

impl GasPriceController {
    /// Restore the last persisted price if present, otherwise start
    /// from `default`. Either way the value is immediately clamped and
    /// persisted, so invariant 7 (`GasPrice ∈ [Min, Max]`) holds the
    /// instant the controller exists.
    pub fn load_or_init(store: Arc<dyn KvStore>, default: u128, min: u128, max: u128) -> Self {
        let stored = store
            .get(&key_gas_price())
            .and_then(|bytes| decode_u128(&bytes).ok());
        let initial = clamp(stored.unwrap_or(default), min, max);
        store.put(&key_gas_price(), &encode_u128(initial));
        Self {
            current: Mutex::new(initial),
            min,
            max,
            store,
        }
    }

    pub fn current(&self) -> u128 {
        *self.current.lock()
    }

    /// `newGP = clamp(currentGP * 1.2, [Min, Max])`. Used on "known tx",
    /// "not found after submit", "transaction underpriced", and unknown
    /// send errors.
    pub fn bump(&self) -> u128 {
        self.adjust(1.2)
    }

    /// `newGP = clamp(currentGP * 0.4, [Min, Max])`. Used after
    /// successful mining.
    pub fn cut(&self) -> u128 {
        self.adjust(0.4)
    }

    fn adjust(&self, factor: f64) -> u128 {
        let mut current = self.current.lock();
        let scaled = ((*current as f64) * factor).round() as u128;
        let next = clamp(scaled, self.min, self.max);
        *current = next;
        self.store.put(&key_gas_price(), &encode_u128(next));
        next
    }
}

fn clamp(v: u128, min: u128, max: u128) -> u128 {
    v.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn bump_then_cut_converges_within_bounds() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let gas = GasPriceController::load_or_init(store, 10_000_000_000, 1_000_000_000, 500_000_000_000);
        assert_eq!(gas.current(), 10_000_000_000);

        let bumped = gas.bump();
        assert_eq!(bumped, 12_000_000_000);

        let cut = gas.cut();
        assert_eq!(cut, (12_000_000_000f64 * 0.4).round() as u128);
    }

    #[test]
    fn clamps_to_min_and_max() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let gas = GasPriceController::load_or_init(store, 1_000_000_000, 1_000_000_000, 1_200_000_000);
        for _ in 0..20 {
            gas.bump();
        }
        assert_eq!(gas.current(), 1_200_000_000);
        for _ in 0..20 {
            gas.cut();
        }
        assert_eq!(gas.current(), 1_000_000_000);
    }

    #[test]
    fn restores_persisted_price_across_instances() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let gas = GasPriceController::load_or_init(store.clone(), 10_000_000_000, 1_000_000_000, 500_000_000_000);
        gas.bump();
        let persisted = gas.current();
        drop(gas);

        let restored = GasPriceController::load_or_init(store, 10_000_000_000, 1_000_000_000, 500_000_000_000);
        assert_eq!(restored.current(), persisted);
    }
}
