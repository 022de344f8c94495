//! Cross-component scenario suite (S1-S6), driven against
//! `MockBackend`/`MockKeystore`/`MemStore` exactly as the manager's own
//! unit tests are, but exercising a full `TransactionManager` instead
//! of one module in isolation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use txmgr_chain::mock::{MockBackend, MockKeystore};
use txmgr_chain::{BackendError, BlockTag, HeadStream, ReceiptInfo, RootChainBackend, SendOutcome, TxInfo};
use txmgr_core::{ManagerConfig, MemStore, Payload, SendAttempt, TransactionManager};

fn sample_payload(to: Address) -> Payload {
    Payload {
        to,
        value: U256::from(1_000u64),
        data: Bytes::new(),
        gas_limit: 21_000,
        caption: Some("scenario".to_string()),
    }
}

async fn wait_for_head(manager: &Arc<TransactionManager>, target: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.current_block_number() < target {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("head never reached target");
}

// S1 - Happy path: pending -> unconfirmed -> confirmed, gas price cut once.
#[tokio::test]
async fn happy_path_moves_raw_through_the_full_lifecycle() {
    let backend = Arc::new(MockBackend::new(1337));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x01);
    keystore.add_account(addr);

    let manager = TransactionManager::new(
        backend.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(1337),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x02)), false, false)
        .await
        .unwrap();

    let hash = match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(hash) => hash,
        other => panic!("expected Sent, got {other:?}"),
    };

    backend.mine(hash, 100, true);
    manager.clear_queue(addr).await;

    manager.start().await.unwrap();
    backend.advance_head(132);
    wait_for_head(&manager, 132).await;
    manager.confirm_queue(addr).await;

    assert_eq!(manager.count(addr, hash).await, 1);
    assert_eq!(
        manager.send_head_of_pending(addr).await.unwrap(),
        SendAttempt::NoPending
    );

    manager.stop().await;
}

// S2 - Underpriced bump: first attempt rejected, bumped gas price
// immediately retried within the same call, no external retry needed.
#[tokio::test]
async fn underpriced_send_bumps_gas_and_retries_once() {
    let backend = Arc::new(MockBackend::new(7));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x03);
    keystore.add_account(addr);

    let manager = TransactionManager::new(
        backend.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(7),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x04)), false, false)
        .await
        .unwrap();

    backend.queue_outcome(SendOutcome::ReplaceUnderpriced);

    match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(_) => {}
        other => panic!("expected the retried send to succeed, got {other:?}"),
    }
}

// S3 - Nonce collision: the chain nonce advances out-of-band, the
// manager's first attempt is rejected, it refreshes and resubmits.
#[tokio::test]
async fn nonce_too_low_refreshes_and_resubmits() {
    let backend = Arc::new(MockBackend::new(1));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x05);
    keystore.add_account(addr);
    backend.set_nonce(addr, 3);

    let manager = TransactionManager::new(
        backend.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(1),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x06)), false, false)
        .await
        .unwrap();

    // Out-of-band send advances the real chain nonce past what the
    // manager believes it is.
    backend.set_nonce(addr, 5);
    backend.queue_outcome(SendOutcome::NonceTooLow);

    match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(_) => {}
        other => panic!("expected nonce refresh then success, got {other:?}"),
    }
}

// Not found after submit: the node accepts the tx but can't show it
// back via transaction_by_hash, so the send engine bumps gas and
// retries within the same call instead of reporting a false success.
#[tokio::test]
async fn invisible_after_submit_bumps_gas_and_retries() {
    let backend = Arc::new(MockBackend::new(1));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x0d);
    keystore.add_account(addr);

    let manager = TransactionManager::new(
        backend.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(1),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x0e)), false, false)
        .await
        .unwrap();

    backend.hide_after_submit(1);

    match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(_) => {}
        other => panic!("expected the retried send to succeed, got {other:?}"),
    }
}

// S4 - Reorg: a mined-but-unconfirmed raw's block is reorged out,
// regresses to pending, and is resubmitted and re-confirmed.
#[tokio::test]
async fn reorged_raw_regresses_to_pending_and_reconfirms() {
    let backend = Arc::new(MockBackend::new(1));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x07);
    keystore.add_account(addr);

    let manager = TransactionManager::new(
        backend.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(1),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x08)), false, false)
        .await
        .unwrap();

    let first_hash = match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(hash) => hash,
        other => panic!("expected Sent, got {other:?}"),
    };
    backend.mine(first_hash, 200, true);
    manager.clear_queue(addr).await;

    // Reorg removes the block the raw was mined in before it ever
    // reaches confirmation.
    backend.reorg_block(200);
    manager.confirm_queue(addr).await;

    // Regressed back to pending: resubmitting succeeds again (the
    // mock backend accepts every never-before-scripted submission).
    let second_hash = match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(hash) => hash,
        other => panic!("expected resubmission to succeed, got {other:?}"),
    };

    backend.mine(second_hash, 220, true);
    manager.clear_queue(addr).await;

    manager.start().await.unwrap();
    backend.advance_head(230);
    wait_for_head(&manager, 230).await;
    manager.confirm_queue(addr).await;

    assert_eq!(manager.count(addr, second_hash).await, 1);
    manager.stop().await;
}

// S5 - Known-tx backoff: MaxNumKnownTx responses in a row cap the
// streak and reset it, rather than spinning forever on one raw.
#[tokio::test(start_paused = true)]
async fn known_transaction_backoff_caps_and_resets_the_streak() {
    let backend = Arc::new(MockBackend::new(1));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x09);
    keystore.add_account(addr);

    let config = ManagerConfig::testing(1);
    let cap = config.max_num_known_tx;
    let manager = TransactionManager::new(backend.clone(), keystore.clone(), store, config)
        .await
        .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x0a)), false, false)
        .await
        .unwrap();

    for i in 0..cap {
        backend.queue_outcome(SendOutcome::KnownTransaction);
        let outcome = manager.send_head_of_pending(addr).await.unwrap();
        assert_eq!(outcome, SendAttempt::KnownTransaction, "iteration {i}");
    }

    // After the cap, the next attempt starts a fresh streak rather than
    // carrying the old count forward.
    match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(_) => {}
        other => panic!("expected the streak reset to allow a clean send, got {other:?}"),
    }
}

// S6 - Reconnect: the header subscription fails once, the tracker
// backs off and resubscribes, and confirmation is depth-based so a
// gap in the stream never causes a missed confirmation.
struct FlakyBackend {
    inner: Arc<MockBackend>,
    subscribe_attempts: AtomicU64,
}

impl FlakyBackend {
    fn new(inner: Arc<MockBackend>) -> Self {
        Self {
            inner,
            subscribe_attempts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RootChainBackend for FlakyBackend {
    async fn chain_id(&self) -> Result<u64, BackendError> {
        self.inner.chain_id().await
    }

    async fn nonce_at(&self, addr: Address, tag: BlockTag) -> Result<u64, BackendError> {
        self.inner.nonce_at(addr, tag).await
    }

    async fn send_transaction(&self, signed_raw: Bytes) -> Result<SendOutcome, BackendError> {
        self.inner.send_transaction(signed_raw).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, BackendError> {
        self.inner.transaction_receipt(hash).await
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxInfo>, BackendError> {
        self.inner.transaction_by_hash(hash).await
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<B256>, BackendError> {
        self.inner.block_hash_at(number).await
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, BackendError> {
        let attempt = self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            return Err(BackendError::Subscription("simulated disconnect".to_string()));
        }
        self.inner.subscribe_new_heads().await
    }
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_a_failed_subscription_with_no_missed_confirmations() {
    let mock = Arc::new(MockBackend::new(1));
    let flaky = Arc::new(FlakyBackend::new(mock.clone()));
    let keystore = Arc::new(MockKeystore::new());
    let store: Arc<MemStore> = Arc::new(MemStore::new());
    let addr = Address::repeat_byte(0x0b);
    keystore.add_account(addr);

    let manager = TransactionManager::new(
        flaky.clone(),
        keystore.clone(),
        store,
        ManagerConfig::testing(1),
    )
    .await
    .unwrap();
    manager.ensure_account(addr).await.unwrap();
    manager
        .add(addr, sample_payload(Address::repeat_byte(0x0c)), false, false)
        .await
        .unwrap();

    let hash = match manager.send_head_of_pending(addr).await.unwrap() {
        SendAttempt::Sent(hash) => hash,
        other => panic!("expected Sent, got {other:?}"),
    };
    mock.mine(hash, 50, true);
    manager.clear_queue(addr).await;

    manager.start().await.unwrap();

    // First subscribe attempt fails; the tracker waits out the 5s
    // backoff (instant under paused time) and resubscribes.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(flaky.subscribe_attempts.load(Ordering::SeqCst) >= 2);

    mock.advance_head(60);
    wait_for_head(&manager, 60).await;
    manager.confirm_queue(addr).await;

    assert_eq!(manager.count(addr, hash).await, 1);
    manager.stop().await;
}
