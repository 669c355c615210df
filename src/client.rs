//! Client bound to one endpoint and one signing key
//!
//! Every RPC-backed operation is timed into `ethereum_req_duration`, tagged
//! with the call name.

use crate::chain::{BlockSummary, ChainClient, EthersChainClient, Receipt};
use crate::config::{ClientOptions, ReceiptConfig};
use crate::contract::{encode_args, parse_abi, Contract};
use crate::error::{LoadResult, LoadTestError};
use crate::metrics::{millis, Metric, MetricsSink, Sample};
use crate::tx::{
    build_typed_transaction, decode_hex, normalize, parse_address, sign_transaction,
    ReceiptAwaiter, ReceiptTask, SendMode, TransactionRequest,
};
use crate::wallet::load_signer;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockId, Bytes, H256, U256};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Gas limit for contract deployments
pub const DEPLOY_GAS_LIMIT: u64 = 1_500_000;

#[derive(Clone)]
pub struct Client {
    endpoint: String,
    chain: Arc<dyn ChainClient>,
    wallet: LocalWallet,
    chain_id: u64,
    sink: Arc<dyn MetricsSink>,
    receipts: ReceiptAwaiter,
}

impl Client {
    /// Connect to the endpoint the options name and fetch its chain id
    pub async fn connect(
        options: &ClientOptions,
        receipts: &ReceiptConfig,
        sink: Arc<dyn MetricsSink>,
    ) -> LoadResult<Self> {
        options.validate()?;
        let wallet = load_signer(options)?;
        let chain = Arc::new(EthersChainClient::new(options.url())?);

        Self::with_chain(options.url(), chain, wallet, receipts.poll_interval(), sink).await
    }

    /// Build a client over an existing chain connection
    pub async fn with_chain(
        endpoint: &str,
        chain: Arc<dyn ChainClient>,
        wallet: LocalWallet,
        receipt_poll_interval: Duration,
        sink: Arc<dyn MetricsSink>,
    ) -> LoadResult<Self> {
        let chain_id = chain.chain_id().await.map_err(|e| {
            LoadTestError::InvalidConfig(format!("unable to fetch chain id from {}: {}", endpoint, e))
        })?;

        let wallet = wallet.with_chain_id(chain_id);
        info!(
            "Client for {} (chain {}) signing as {:?}",
            endpoint,
            chain_id,
            wallet.address()
        );

        let receipts = ReceiptAwaiter::new(chain.clone(), sink.clone(), receipt_poll_interval);

        Ok(Self {
            endpoint: endpoint.to_string(),
            chain,
            wallet,
            chain_id,
            sink,
            receipts,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the signing key
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain(&self) -> Arc<dyn ChainClient> {
        self.chain.clone()
    }

    async fn timed<T, F>(&self, call: &str, fut: F) -> LoadResult<T>
    where
        F: Future<Output = LoadResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.sink.push(
            Sample::new(Metric::RequestDuration, millis(started.elapsed())).tag("call", call),
        );
        result
    }

    /// Raw JSON-RPC call
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> LoadResult<serde_json::Value> {
        self.timed(method, self.chain.request(method.to_string(), params))
            .await
    }

    pub async fn gas_price(&self) -> LoadResult<U256> {
        self.timed("gas_price", self.chain.gas_price()).await
    }

    pub async fn get_balance(&self, address: &str, block: Option<BlockId>) -> LoadResult<U256> {
        let address = parse_address(address)?;
        self.timed("get_balance", self.chain.get_balance(address, block))
            .await
    }

    pub async fn block_number(&self) -> LoadResult<u64> {
        self.timed("block_number", self.chain.block_number()).await
    }

    pub async fn get_block_by_number(&self, number: u64) -> LoadResult<Option<BlockSummary>> {
        self.timed("get_block_by_number", self.chain.get_block_by_number(number))
            .await
    }

    /// Pending nonce of `address`
    pub async fn get_nonce(&self, address: &str) -> LoadResult<u64> {
        let address = parse_address(address)?;
        self.timed("get_nonce", self.chain.get_nonce(address)).await
    }

    /// Gas estimate for `req` sent from the signing key
    pub async fn estimate_gas(&self, req: &TransactionRequest) -> LoadResult<u64> {
        req.validate()?;
        let tx = normalize(req.clone(), SendMode::Raw);
        let mut typed = build_typed_transaction(&tx, Some(self.address()), self.chain_id)?;
        clear_gas(&mut typed);

        self.timed("estimate_gas", self.chain.estimate_gas(typed))
            .await
            .map_err(|e| match e {
                LoadTestError::Transport { endpoint, message } => LoadTestError::Transport {
                    endpoint,
                    message: format!("failed to estimate gas: {}", message),
                },
                other => other,
            })
    }

    /// Submit through `eth_sendTransaction`; the node signs for `from`
    pub async fn send_transaction(&self, req: TransactionRequest) -> LoadResult<H256> {
        req.validate()?;
        let tx = normalize(req, SendMode::NodeSigned);
        let typed = build_typed_transaction(&tx, None, self.chain_id)?;

        self.timed("send_transaction", self.chain.send_transaction(typed))
            .await
    }

    /// Sign locally and submit through `eth_sendRawTransaction`.
    ///
    /// The gas limit is estimated when the request leaves it unset.
    pub async fn send_raw_transaction(&self, mut req: TransactionRequest) -> LoadResult<H256> {
        req.validate()?;
        if req.gas == 0 {
            req.gas = self.estimate_gas(&req).await?;
        }

        let tx = normalize(req, SendMode::Raw);
        let typed = build_typed_transaction(&tx, Some(self.address()), self.chain_id)?;
        let raw = sign_transaction(&self.wallet, &typed).await?;

        let hash = self
            .timed("send_raw_transaction", self.chain.send_raw_transaction(raw))
            .await?;
        debug!("Sent {:?} with nonce {}", hash, tx.nonce);
        Ok(hash)
    }

    /// Receipt of `hash`, `NotFound` while it is not mined
    pub async fn get_transaction_receipt(&self, hash: &str) -> LoadResult<Receipt> {
        let hash = parse_hash(hash)?;
        self.timed(
            "get_transaction_receipt",
            self.chain.get_transaction_receipt(hash),
        )
        .await?
        .ok_or_else(|| LoadTestError::NotFound(format!("receipt for {:?}", hash)))
    }

    /// Start waiting for the receipt of `hash` in the background
    pub fn wait_for_transaction_receipt(&self, hash: H256) -> ReceiptTask {
        self.receipts.spawn(hash)
    }

    /// Accounts managed by the node. Usually disabled on hosted providers.
    pub async fn accounts(&self) -> LoadResult<Vec<String>> {
        let accounts = self.timed("accounts", self.chain.accounts()).await?;
        Ok(accounts.iter().map(|a| format!("{:?}", a)).collect())
    }

    /// `eth_call` at the latest block
    pub async fn eth_call(&self, tx: TypedTransaction) -> LoadResult<Bytes> {
        self.timed("call", self.chain.call(tx)).await
    }

    /// Fill a request that names no fee at all with the node's gas price
    pub async fn price_from_node(&self, req: &mut TransactionRequest) -> LoadResult<()> {
        if req.gas_price == 0 && req.gas_fee_cap == 0 && req.gas_tip_cap == 0 {
            let price = self.gas_price().await?;
            req.gas_price = u64::try_from(price).map_err(|_| {
                LoadTestError::InvalidTransaction(format!("gas price {} out of range", price))
            })?;
        }
        Ok(())
    }

    pub fn new_contract(&self, address: &str, abi: &str) -> LoadResult<Contract> {
        Ok(Contract::new(
            self.clone(),
            parse_address(address)?,
            parse_abi(abi)?,
        ))
    }

    /// Deploy a contract and wait until it is mined
    pub async fn deploy_contract(
        &self,
        abi: &str,
        bytecode: &str,
        args: &[serde_json::Value],
    ) -> LoadResult<Receipt> {
        let abi = parse_abi(abi)?;
        let code = decode_hex(bytecode)
            .map_err(|e| LoadTestError::Encoding(format!("failed to decode bytecode: {}", e)))?;

        let input = match abi.constructor() {
            Some(constructor) => {
                let tokens = encode_args(&constructor.inputs, args)?;
                constructor
                    .encode_input(code, &tokens)
                    .map_err(|e| LoadTestError::Encoding(format!("constructor arguments: {}", e)))?
            }
            None if args.is_empty() => code,
            None => {
                return Err(LoadTestError::Encoding(
                    "contract has no constructor but arguments were given".to_string(),
                ))
            }
        };

        let nonce = self
            .timed("get_nonce", self.chain.get_nonce(self.address()))
            .await?;
        let mut req = TransactionRequest {
            input,
            gas: DEPLOY_GAS_LIMIT,
            nonce,
            ..Default::default()
        };
        self.price_from_node(&mut req).await?;

        let hash = self.send_raw_transaction(req).await?;
        info!("Deploying contract in {:?}", hash);
        self.receipts.await_receipt(hash).await
    }
}

fn clear_gas(tx: &mut TypedTransaction) {
    match tx {
        TypedTransaction::Legacy(inner) => inner.gas = None,
        TypedTransaction::Eip2930(inner) => inner.tx.gas = None,
        TypedTransaction::Eip1559(inner) => inner.gas = None,
    }
}

/// Parse a 32-byte transaction hash
pub fn parse_hash(value: &str) -> LoadResult<H256> {
    H256::from_str(value.trim())
        .map_err(|e| LoadTestError::Encoding(format!("invalid hash {}: {}", value, e)))
}
