//! Scenario runner
//!
//! Drives a fixed number of virtual users (VUs) against one client. VUs
//! share the signing key, so nonces come from a single [`NonceManager`].
//! Iterations are claimed from a shared counter until the iteration count
//! or the deadline is reached.

use crate::client::Client;
use crate::config::{ScenarioAction, ScenarioConfig};
use crate::contract::{Contract, TxnOpts};
use crate::error::{LoadResult, LoadTestError};
use crate::tx::{NonceManager, TransactionRequest};

use ethers::types::H256;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Totals for one scenario run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub sent: u64,
    pub mined: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    next_iteration: AtomicU64,
    sent: AtomicU64,
    mined: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

pub struct ScenarioRunner {
    client: Client,
    config: ScenarioConfig,
    nonces: Arc<NonceManager>,
    contract: Option<Contract>,
}

impl ScenarioRunner {
    pub fn new(client: Client, config: ScenarioConfig) -> LoadResult<Self> {
        if config.vus == 0 {
            return Err(LoadTestError::InvalidConfig(
                "scenario needs at least one vu".to_string(),
            ));
        }
        if config.iterations == 0 && config.duration_secs.is_none() {
            return Err(LoadTestError::InvalidConfig(
                "scenario needs iterations or duration_secs".to_string(),
            ));
        }

        let contract = match &config.action {
            ScenarioAction::ContractTxn { address, abi, .. } => {
                Some(client.new_contract(address, abi)?)
            }
            ScenarioAction::Transfer { .. } => None,
        };

        Ok(Self {
            nonces: Arc::new(NonceManager::new(client.address())),
            client,
            config,
            contract,
        })
    }

    /// Run every VU to completion
    pub async fn run(&self) -> LoadResult<ScenarioReport> {
        self.nonces.init(self.client.chain().as_ref()).await?;

        let started = Instant::now();
        let deadline = self
            .config
            .duration_secs
            .map(|secs| started + Duration::from_secs(secs));
        let counters = Counters::default();

        info!(
            "Starting scenario: {} vus, {} iterations, duration {:?}",
            self.config.vus, self.config.iterations, self.config.duration_secs
        );

        join_all((0..self.config.vus).map(|vu| self.run_vu(vu, deadline, &counters))).await;

        let report = ScenarioReport {
            sent: counters.sent.load(Ordering::Relaxed),
            mined: counters.mined.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        };
        info!("Scenario finished: {:?}", report);
        Ok(report)
    }

    async fn run_vu(&self, vu: usize, deadline: Option<Instant>, counters: &Counters) {
        loop {
            if deadline.map_or(false, |d| Instant::now() >= d) {
                break;
            }
            let iteration = counters.next_iteration.fetch_add(1, Ordering::Relaxed);
            if self.config.iterations > 0 && iteration >= self.config.iterations {
                break;
            }

            debug!("vu {} iteration {}", vu, iteration);
            self.run_iteration(counters).await;
        }
    }

    async fn run_iteration(&self, counters: &Counters) {
        let nonce = match self.nonces.allocate().await {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("Nonce allocation failed: {}", e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let hash = match self.submit(nonce).await {
            Ok(hash) => {
                self.nonces.mark_sent(nonce);
                counters.sent.fetch_add(1, Ordering::Relaxed);
                hash
            }
            Err(e) => {
                self.nonces.release(nonce).await;
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Submission with nonce {} failed: {}", nonce, e);

                if e.to_string().contains("nonce too low") {
                    if let Err(e) = self.nonces.sync(self.client.chain().as_ref()).await {
                        warn!("Nonce resync failed: {}", e);
                    }
                }
                return;
            }
        };

        if !self.config.wait_for_receipt {
            return;
        }

        let limit = Duration::from_secs(self.config.receipt_timeout_secs);
        match self
            .client
            .wait_for_transaction_receipt(hash)
            .wait_timeout(limit)
            .await
        {
            Ok(receipt) => {
                if !receipt.succeeded() {
                    warn!("Transaction {:?} reverted", hash);
                }
                counters.mined.fetch_add(1, Ordering::Relaxed);
            }
            Err(LoadTestError::Timeout { .. }) => {
                warn!("No receipt for {:?} within {:?}", hash, limit);
                counters.timed_out.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Receipt wait for {:?} failed: {}", hash, e);
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn submit(&self, nonce: u64) -> LoadResult<H256> {
        match &self.config.action {
            ScenarioAction::Transfer {
                to,
                value,
                gas,
                gas_price,
                gas_fee_cap,
                gas_tip_cap,
            } => {
                let req = TransactionRequest {
                    gas: *gas,
                    gas_price: *gas_price,
                    gas_fee_cap: *gas_fee_cap,
                    gas_tip_cap: *gas_tip_cap,
                    nonce,
                    ..TransactionRequest::transfer(to, *value)
                };
                self.client.send_raw_transaction(req).await
            }
            ScenarioAction::ContractTxn {
                method,
                args,
                value,
                gas_limit,
                gas_price,
                ..
            } => {
                let contract = self.contract.as_ref().ok_or_else(|| {
                    LoadTestError::Internal("contract scenario without contract".to_string())
                })?;
                let opts = TxnOpts {
                    value: *value,
                    gas_price: *gas_price,
                    gas_limit: *gas_limit,
                    nonce: Some(nonce),
                };
                contract.txn(method, opts, args).await
            }
        }
    }
}
