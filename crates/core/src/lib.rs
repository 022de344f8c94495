//! Plasma-style root-chain transaction manager core.
//!
//! A durable, per-account pipeline that binds abstract "raw
//! transactions" to monotonically increasing nonces, signs and
//! broadcasts them through a pluggable [`RootChainBackend`]/[`Keystore`]
//! pair, adapts gas price to observed failures, and tracks each raw
//! through `pending → unconfirmed → confirmed`, surviving reorgs,
//! restarts, and RPC disconnects.
//!
//! This crate never touches a concrete RPC client or wallet type — see
//! `txmgr-chain` for the `alloy`-backed adapters and the in-memory mock
//! used throughout this crate's own test suite.

mod confirm;
pub mod config;
pub mod errors;
pub mod gas;
pub mod header_tracker;
pub mod manager;
pub mod queue;
pub mod raw_tx;
mod send_engine;
pub mod state;
pub mod store;

pub use config::ManagerConfig;
pub use errors::ManagerError;
pub use gas::GasPriceController;
pub use header_tracker::HeaderTracker;
pub use manager::TransactionManager;
pub use queue::AccountQueues;
pub use raw_tx::{hash_payload, Payload, PendingVariant, RawTransaction};
pub use send_engine::SendAttempt;
pub use state::{AccountEntry, QueueState};
pub use store::{KvStore, MemStore};
