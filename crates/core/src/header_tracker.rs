//! Subscribe-and-reconnect to the root chain's new-head stream (§4.F).
//!
//! A `loop { match subscribe().await { ... } sleep(5s) }` reconnect
//! idiom wraps the subscription: instead of every send attempt opening
//! its own ad hoc subscription, this tracker owns
//! the one live subscription and fans each head out to two shared
//! channels — a coalescing `watch<u64>` for "what is the latest head"
//! and a `broadcast<u64>` for "a new head just arrived", which is
//! exactly the wait primitive the send engine's "known transaction"
//! backoff needs.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use txmgr_chain::RootChainBackend;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct HeaderTracker {
    backend: Arc<dyn RootChainBackend>,
    head_tx: watch::Sender<u64>,
    new_head_bcast: broadcast::Sender<u64>,
}

impl HeaderTracker {
    pub fn new(
        backend: Arc<dyn RootChainBackend>,
        head_tx: watch::Sender<u64>,
        new_head_bcast: broadcast::Sender<u64>,
    ) -> Self {
        Self {
            backend,
            head_tx,
            new_head_bcast,
        }
    }

    /// Run the subscribe/reconnect loop until `cancel` fires. `on_head`
    /// runs after the shared head channels have already observed the
    /// new number, so anything it triggers (the confirmation gate) sees
    /// up-to-date `currentBlockNumber`.
    ///
    /// The subscription stream is simply dropped on reconnect — alloy's
    /// `RpcSubscription` unsubscribes on `Drop`, so there is no manual
    /// unsubscribe call here to double-invoke.
    pub async fn run<F, Fut>(self: Arc<Self>, cancel: CancellationToken, on_head: F)
    where
        F: Fn(u64) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = ()> + Send,
    {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.backend.subscribe_new_heads().await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = stream.next() => {
                            match next {
                                Some(number) => {
                                    let _ = self.head_tx.send(number);
                                    let _ = self.new_head_bcast.send(number);
                                    on_head(number).await;
                                }
                                None => {
                                    warn!("new-head subscription ended, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                },
                Err(e) => {
                    error!(error = %e, "failed to subscribe to new heads, retrying in 5s");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }
}
