//! The closed set of logical errors the manager's public operations can
//! return, plus the propagation policy from the design: transient RPC
//! failures are swallowed at the worker boundary and only logged, while
//! the errors below are surfaced to the caller of `Add`/`Start`/`Stop`.

use alloy::primitives::{Address, B256};
use thiserror::Error;

use txmgr_chain::{BackendError, KeystoreError};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("account {0} is not known to the keystore")]
    UnknownAccount(Address),

    #[error("raw transaction with hash {0} was already submitted (use duplicate=true to resubmit intentionally)")]
    DuplicateRaw(B256),

    #[error("duplicate=true given for raw hash {0} but no prior submission exists")]
    NoDuplicateRaw(B256),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("persistence error: {0}")]
    Store(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("keystore error: {0}")]
    Keystore(#[from] KeystoreError),
}
