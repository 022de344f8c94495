//! Root-chain adapter layer: the RPC backend and keystore seams the
//! transaction manager core is generic over.
//!
//! This crate never makes a decision about *what* to send or *when* —
//! it only knows how to sign a transaction, submit it, and classify
//! whatever the provider says back into the closed error taxonomy the
//! manager core matches on. See `txmgr-core` for the state machine.

mod alloy_backend;
mod alloy_keystore;
mod backend;
mod keystore;
pub mod mock;

pub use alloy_backend::AlloyBackend;
pub use alloy_keystore::AlloyKeystore;
pub use backend::{
    classify_send_error, BackendError, BlockTag, HeadStream, ReceiptInfo, RootChainBackend,
    SendOutcome, TxInfo,
};
pub use keystore::{Keystore, KeystoreError, SignedTx, UnsignedTx};
