//! Block polling
//!
//! One loop per endpoint fetches the head block, derives block time and TPS
//! and emits four samples per new block:
//! - `ethereum_block` (tagged with transaction count, gas used, gas limit)
//! - `ethereum_gas_used`
//! - `ethereum_tps`
//! - `ethereum_block_time` (tagged with the chain timestamp difference)
//!
//! Pollers are started through [`PollerRegistry::start_polling`], which is
//! idempotent per endpoint. The registry owns the [`BlockDedup`] shared by
//! every poller it creates.

mod dedup;

pub use dedup::{BlockDedup, DEFAULT_RETAIN_BLOCKS};

use crate::chain::{BlockSummary, ChainClient};
use crate::config::PollerConfig;
use crate::error::LoadResult;
use crate::metrics::{millis, Metric, MetricsSink, Sample};

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Derived figures for one newly observed block
#[derive(Debug, Clone, PartialEq)]
pub struct BlockObservation {
    pub block_number: u64,
    pub timestamp: u64,
    pub transaction_count: usize,
    pub gas_used: u64,
    pub gas_limit: u64,
    /// Zero without a previous block or when timestamps did not advance
    pub tps: f64,
    /// Wall-clock time since the previous observed block
    pub block_time: Duration,
    /// Chain timestamp difference to the previous block
    pub timestamp_diff: Duration,
}

impl BlockObservation {
    pub fn compute(
        block: &BlockSummary,
        previous: Option<&BlockSummary>,
        block_time: Duration,
    ) -> Self {
        let (tps, timestamp_diff, block_time) = match previous {
            Some(prev) => {
                let diff = block.timestamp.saturating_sub(prev.timestamp);
                let tps = if diff > 0 {
                    block.transaction_count as f64 / diff as f64
                } else {
                    0.0
                };
                (tps, Duration::from_secs(diff), block_time)
            }
            None => (0.0, Duration::ZERO, Duration::ZERO),
        };

        Self {
            block_number: block.number,
            timestamp: block.timestamp,
            transaction_count: block.transaction_count,
            gas_used: block.gas_used,
            gas_limit: block.gas_limit,
            tps,
            block_time,
            timestamp_diff,
        }
    }

    /// The four samples reported for this block
    pub fn samples(&self, endpoint: &str) -> Vec<Sample> {
        vec![
            Sample::new(Metric::Block, self.block_number as f64)
                .tag("endpoint", endpoint)
                .tag("transactions", self.transaction_count)
                .tag("gas_used", self.gas_used)
                .tag("gas_limit", self.gas_limit),
            Sample::new(Metric::GasUsed, self.gas_used as f64)
                .tag("endpoint", endpoint)
                .tag("block", self.block_number),
            Sample::new(Metric::Tps, self.tps).tag("endpoint", endpoint),
            Sample::new(Metric::BlockTime, millis(self.block_time))
                .tag("endpoint", endpoint)
                .tag("block_timestamp_diff", format!("{:?}", self.timestamp_diff)),
        ]
    }
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Head has not moved
    Unchanged,
    /// Node reported a head it could not return yet
    MissingBlock(u64),
    /// Another poller already reported this block
    Duplicate(u64),
    Emitted(BlockObservation),
}

/// Polling state for one endpoint
pub struct BlockPoller {
    endpoint: String,
    chain: Arc<dyn ChainClient>,
    sink: Arc<dyn MetricsSink>,
    dedup: Arc<BlockDedup>,
    /// Highest block number accepted so far
    last_number: Option<u64>,
    previous: Option<BlockSummary>,
    last_seen_at: Instant,
}

impl BlockPoller {
    pub fn new(
        endpoint: &str,
        chain: Arc<dyn ChainClient>,
        sink: Arc<dyn MetricsSink>,
        dedup: Arc<BlockDedup>,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            chain,
            sink,
            dedup,
            last_number: None,
            previous: None,
            last_seen_at: Instant::now(),
        }
    }

    /// Poll the head once
    pub async fn tick(&mut self) -> LoadResult<TickOutcome> {
        let number = self.chain.block_number().await?;

        if self.last_number.map_or(false, |last| number <= last) {
            return Ok(TickOutcome::Unchanged);
        }

        let now = Instant::now();
        let block_time = now.duration_since(self.last_seen_at);
        self.last_seen_at = now;

        let block = match self.chain.get_block_by_number(number).await? {
            Some(block) => block,
            None => {
                debug!("Block {} on {} not available yet", number, self.endpoint);
                return Ok(TickOutcome::MissingBlock(number));
            }
        };
        self.last_number = Some(number);

        let observation = BlockObservation::compute(&block, self.previous.as_ref(), block_time);
        self.previous = Some(block);

        if !self.dedup.first_sighting(&self.endpoint, number) {
            return Ok(TickOutcome::Duplicate(number));
        }

        for sample in observation.samples(&self.endpoint) {
            self.sink.push(sample);
        }

        Ok(TickOutcome::Emitted(observation))
    }

    /// Poll forever. Errors are logged and retried with doubling delay.
    pub async fn run(mut self, interval: Duration, max_backoff: Duration) {
        info!("Block poller started for {}", self.endpoint);
        let mut delay = interval;

        loop {
            tokio::time::sleep(delay).await;

            match self.tick().await {
                Ok(outcome) => {
                    delay = interval;
                    if let TickOutcome::Emitted(obs) = outcome {
                        debug!(
                            "Block {} on {}: {} txs, {:.2} tps",
                            obs.block_number, self.endpoint, obs.transaction_count, obs.tps
                        );
                    }
                }
                Err(e) => {
                    delay = (delay * 2).min(max_backoff.max(interval));
                    warn!(
                        "Block poll on {} failed: {}; retrying in {:?}",
                        self.endpoint, e, delay
                    );
                }
            }
        }
    }
}

/// Running poll loop; aborted when the last handle goes away
struct PollerTask {
    endpoint: String,
    join: JoinHandle<()>,
}

impl Drop for PollerTask {
    fn drop(&mut self) {
        self.join.abort();
        debug!("Block poller for {} stopped", self.endpoint);
    }
}

/// Keeps an endpoint's poller alive
#[derive(Clone)]
pub struct PollerHandle {
    task: Arc<PollerTask>,
}

impl PollerHandle {
    pub fn endpoint(&self) -> &str {
        &self.task.endpoint
    }

    pub fn is_running(&self) -> bool {
        !self.task.join.is_finished()
    }

    /// Whether two handles drive the same poll loop
    pub fn same_poller(&self, other: &PollerHandle) -> bool {
        Arc::ptr_eq(&self.task, &other.task)
    }
}

/// Owns the dedup set and at most one poller per endpoint
pub struct PollerRegistry {
    config: PollerConfig,
    sink: Arc<dyn MetricsSink>,
    dedup: Arc<BlockDedup>,
    pollers: DashMap<String, Weak<PollerTask>>,
}

impl PollerRegistry {
    pub fn new(config: PollerConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let dedup = Arc::new(BlockDedup::new(config.retain_blocks));
        Self {
            config,
            sink,
            dedup,
            pollers: DashMap::new(),
        }
    }

    /// Start polling `endpoint`, or join the poller already running for it
    pub fn start_polling(&self, endpoint: &str, chain: Arc<dyn ChainClient>) -> PollerHandle {
        let mut entry = self.pollers.entry(endpoint.to_string()).or_default();

        if let Some(task) = entry.upgrade() {
            return PollerHandle { task };
        }

        let poller = BlockPoller::new(endpoint, chain, self.sink.clone(), self.dedup.clone());
        let join = tokio::spawn(poller.run(self.config.interval(), self.config.max_backoff()));
        let task = Arc::new(PollerTask {
            endpoint: endpoint.to_string(),
            join,
        });
        *entry = Arc::downgrade(&task);

        PollerHandle { task }
    }

    /// Endpoints with a live poller
    pub fn active_pollers(&self) -> usize {
        self.pollers
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn dedup(&self) -> Arc<BlockDedup> {
        self.dedup.clone()
    }
}
