//! Chain module - the JSON-RPC surface the load tester consumes
//!
//! [`ChainClient`] is the seam between load-test logic and the node. The
//! production implementation wraps an ethers HTTP provider; tests use the
//! generated `MockChainClient`.

pub mod provider;

pub use provider::EthersChainClient;

use crate::error::LoadResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};

/// Capabilities the load tester needs from an Ethereum node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> LoadResult<u64>;

    async fn block_number(&self) -> LoadResult<u64>;

    /// Block header data, `None` if the node does not know the block yet
    async fn get_block_by_number(&self, number: u64) -> LoadResult<Option<BlockSummary>>;

    async fn get_balance(&self, address: Address, block: Option<BlockId>) -> LoadResult<U256>;

    /// Pending transaction count of `address`
    async fn get_nonce(&self, address: Address) -> LoadResult<u64>;

    /// Receipt for `hash`, `None` while the transaction is not mined
    async fn get_transaction_receipt(&self, hash: H256) -> LoadResult<Option<Receipt>>;

    async fn estimate_gas(&self, tx: TypedTransaction) -> LoadResult<u64>;

    async fn gas_price(&self) -> LoadResult<U256>;

    /// `eth_call` against the latest block
    async fn call(&self, tx: TypedTransaction) -> LoadResult<Bytes>;

    /// `eth_sendTransaction`, signed by the node
    async fn send_transaction(&self, tx: TypedTransaction) -> LoadResult<H256>;

    async fn send_raw_transaction(&self, raw: Bytes) -> LoadResult<H256>;

    async fn accounts(&self) -> LoadResult<Vec<Address>>;

    /// Arbitrary JSON-RPC request
    async fn request(
        &self,
        method: String,
        params: serde_json::Value,
    ) -> LoadResult<serde_json::Value>;
}

/// Block header fields the poller reports on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: Option<H256>,
    pub timestamp: u64,
    pub transaction_count: usize,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee_per_gas: Option<U256>,
}

/// Inclusion record of a mined transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub transaction_index: u64,
    pub contract_address: Option<Address>,
    pub block_hash: Option<H256>,
    pub from: Address,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub cumulative_gas_used: u64,
    pub logs_bloom: Bytes,
    pub status: Option<u64>,
}

impl Receipt {
    /// `true` unless the node reported a failed execution
    pub fn succeeded(&self) -> bool {
        self.status != Some(0)
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(r: TransactionReceipt) -> Self {
        Self {
            transaction_hash: r.transaction_hash,
            transaction_index: r.transaction_index.as_u64(),
            contract_address: r.contract_address,
            block_hash: r.block_hash,
            from: r.from,
            block_number: r.block_number.map(|b| b.as_u64()),
            gas_used: r.gas_used.map(|g| g.low_u64()),
            cumulative_gas_used: r.cumulative_gas_used.low_u64(),
            logs_bloom: Bytes::from(r.logs_bloom.as_bytes().to_vec()),
            status: r.status.map(|s| s.as_u64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U64;

    #[test]
    fn test_receipt_from_ethers() {
        let mut raw = TransactionReceipt::default();
        raw.transaction_hash = H256::repeat_byte(0xab);
        raw.block_number = Some(U64::from(12));
        raw.gas_used = Some(U256::from(21_000));
        raw.status = Some(U64::from(1));

        let receipt = Receipt::from(raw);
        assert_eq!(receipt.transaction_hash, H256::repeat_byte(0xab));
        assert_eq!(receipt.block_number, Some(12));
        assert_eq!(receipt.gas_used, Some(21_000));
        assert_eq!(receipt.logs_bloom.len(), 256);
        assert!(receipt.succeeded());
    }

    #[test]
    fn test_failed_receipt() {
        let receipt = Receipt {
            status: Some(0),
            ..Default::default()
        };
        assert!(!receipt.succeeded());
    }
}
