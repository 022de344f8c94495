//! `RootChainBackend` implementation over a live JSON-RPC endpoint,
//! using `alloy`: a fresh `ProviderBuilder` per logical connection,
//! HTTP for request/response calls and a dedicated WebSocket
//! connection for the head subscription.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::backend::{
    classify_send_error, BackendError, BlockTag, HeadStream, ReceiptInfo, RootChainBackend,
    SendOutcome, TxInfo,
};

pub struct AlloyBackend {
    http_url: String,
    ws_url: String,
}

impl AlloyBackend {
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_url: ws_url.into(),
        }
    }

    fn rpc_err(context: &str, err: impl std::fmt::Display) -> BackendError {
        BackendError::Rpc(format!("{context}: {err}"))
    }
}

#[async_trait]
impl RootChainBackend for AlloyBackend {
    async fn chain_id(&self) -> Result<u64, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);
        provider
            .get_chain_id()
            .await
            .map_err(|e| Self::rpc_err("get_chain_id", e))
    }

    async fn nonce_at(&self, addr: Address, tag: BlockTag) -> Result<u64, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);
        let block = match tag {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Pending => BlockNumberOrTag::Pending,
        };
        provider
            .get_transaction_count(addr)
            .block_id(block.into())
            .await
            .map_err(|e| Self::rpc_err("get_transaction_count", e))
    }

    async fn send_transaction(&self, signed_raw: Bytes) -> Result<SendOutcome, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);

        match provider.send_raw_transaction(&signed_raw).await {
            Ok(pending) => {
                let hash = *pending.tx_hash();
                debug!(tx_hash = %hash, "transaction submitted");
                Ok(SendOutcome::Submitted(hash))
            }
            Err(e) => {
                let outcome = classify_send_error(&e.to_string());
                warn!(error = %e, ?outcome, "send_transaction rejected by provider");
                Ok(outcome)
            }
        }
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptInfo>, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| Self::rpc_err("get_transaction_receipt", e))?;

        Ok(receipt.map(|r| ReceiptInfo {
            tx_hash: hash,
            block_number: r.block_number.unwrap_or_default(),
            block_hash: r.block_hash.unwrap_or_default(),
            status: r.status(),
        }))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxInfo>, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);
        let tx = provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| Self::rpc_err("get_transaction_by_hash", e))?;

        Ok(tx.map(|t| TxInfo {
            hash,
            pending: t.block_hash.is_none(),
        }))
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<B256>, BackendError> {
        let provider = ProviderBuilder::new()
            .on_http(self.http_url.parse().map_err(|e| Self::rpc_err("bad http url", e))?);
        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| Self::rpc_err("get_block_by_number", e))?;
        Ok(block.map(|b| b.header.hash))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, BackendError> {
        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(|e| BackendError::Subscription(e.to_string()))?;
        let sub = provider
            .subscribe_blocks()
            .await
            .map_err(|e| BackendError::Subscription(e.to_string()))?;
        let inner = sub.into_stream();

        // `futures::stream::unfold` keeps the provider alive for the
        // lifetime of the stream, so the WebSocket isn't dropped out
        // from under the subscription.
        let stream = futures::stream::unfold((provider, inner), |(provider, mut inner)| async move {
            inner.next().await.map(|header| (header.number, (provider, inner)))
        });

        Ok(Box::pin(stream))
    }
}
