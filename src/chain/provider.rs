//! ethers-backed [`ChainClient`] over a single HTTP endpoint

use super::{BlockSummary, ChainClient, Receipt};
use crate::error::{LoadResult, LoadTestError};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tracing::debug;

/// HTTP JSON-RPC client for one endpoint
pub struct EthersChainClient {
    /// Endpoint URL, used for error context
    endpoint: String,
    provider: Provider<Http>,
}

impl EthersChainClient {
    /// Create a new client; the URL is validated, the node is not contacted
    pub fn new(url: &str) -> LoadResult<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| LoadTestError::InvalidConfig(format!("invalid url {}: {}", url, e)))?
            .interval(Duration::from_millis(100));

        debug!("Created HTTP provider for {}", url);

        Ok(Self {
            endpoint: url.to_string(),
            provider,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn transport(&self, err: impl std::fmt::Display) -> LoadTestError {
        LoadTestError::transport(&self.endpoint, err)
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn chain_id(&self) -> LoadResult<u64> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.low_u64())
            .map_err(|e| self.transport(e))
    }

    async fn block_number(&self) -> LoadResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.transport(e))
    }

    async fn get_block_by_number(&self, number: u64) -> LoadResult<Option<BlockSummary>> {
        let block = self
            .provider
            .get_block(number)
            .await
            .map_err(|e| self.transport(e))?;

        Ok(block.map(|b| BlockSummary {
            number: b.number.map(|n| n.as_u64()).unwrap_or(number),
            hash: b.hash,
            timestamp: b.timestamp.low_u64(),
            transaction_count: b.transactions.len(),
            gas_used: b.gas_used.low_u64(),
            gas_limit: b.gas_limit.low_u64(),
            base_fee_per_gas: b.base_fee_per_gas,
        }))
    }

    async fn get_balance(&self, address: Address, block: Option<BlockId>) -> LoadResult<U256> {
        self.provider
            .get_balance(address, block)
            .await
            .map_err(|e| self.transport(e))
    }

    async fn get_nonce(&self, address: Address) -> LoadResult<u64> {
        self.provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map(|n| n.low_u64())
            .map_err(|e| self.transport(e))
    }

    async fn get_transaction_receipt(&self, hash: H256) -> LoadResult<Option<Receipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map(|r| r.map(Receipt::from))
            .map_err(|e| self.transport(e))
    }

    async fn estimate_gas(&self, tx: TypedTransaction) -> LoadResult<u64> {
        self.provider
            .estimate_gas(&tx, None)
            .await
            .map(|g| g.low_u64())
            .map_err(|e| self.transport(e))
    }

    async fn gas_price(&self) -> LoadResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn call(&self, tx: TypedTransaction) -> LoadResult<Bytes> {
        self.provider
            .call(&tx, Some(BlockNumber::Latest.into()))
            .await
            .map_err(|e| self.transport(e))
    }

    async fn send_transaction(&self, tx: TypedTransaction) -> LoadResult<H256> {
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(|e| self.transport(e))?;
        Ok(pending.tx_hash())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> LoadResult<H256> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.transport(e))?;
        Ok(pending.tx_hash())
    }

    async fn accounts(&self) -> LoadResult<Vec<Address>> {
        self.provider
            .get_accounts()
            .await
            .map_err(|e| self.transport(e))
    }

    async fn request(
        &self,
        method: String,
        params: serde_json::Value,
    ) -> LoadResult<serde_json::Value> {
        self.provider
            .request::<_, serde_json::Value>(&method, params)
            .await
            .map_err(|e| self.transport(e))
    }
}
