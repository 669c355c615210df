//! Load test metrics
//!
//! Operations push tagged [`Sample`]s into a [`MetricsSink`]. The production
//! sink forwards them to Prometheus collectors exposed on `/metrics`:
//! - RPC request duration per call
//! - Time to mine per awaited transaction
//! - Block height, gas used, TPS and block time per endpoint

use crate::error::{LoadResult, LoadTestError};

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge_vec, register_histogram_vec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

lazy_static! {
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "ethereum_req_duration_ms",
        "JSON-RPC request duration in milliseconds",
        &["call"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    ).unwrap();

    pub static ref TIME_TO_MINE: HistogramVec = register_histogram_vec!(
        "ethereum_time_to_mine_ms",
        "Time from submission wait start to receipt availability in milliseconds",
        &[],
        vec![100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0, 60000.0]
    ).unwrap();

    pub static ref BLOCK_NUMBER: GaugeVec = register_gauge_vec!(
        "ethereum_block",
        "Latest observed block number",
        &["endpoint"]
    ).unwrap();

    pub static ref BLOCK_TRANSACTIONS: GaugeVec = register_gauge_vec!(
        "ethereum_block_transactions",
        "Transaction count of the latest observed block",
        &["endpoint"]
    ).unwrap();

    pub static ref BLOCK_GAS_LIMIT: GaugeVec = register_gauge_vec!(
        "ethereum_block_gas_limit",
        "Gas limit of the latest observed block",
        &["endpoint"]
    ).unwrap();

    pub static ref GAS_USED: GaugeVec = register_gauge_vec!(
        "ethereum_gas_used",
        "Gas used by the latest observed block",
        &["endpoint"]
    ).unwrap();

    pub static ref TPS: GaugeVec = register_gauge_vec!(
        "ethereum_tps",
        "Transactions per second derived from consecutive block timestamps",
        &["endpoint"]
    ).unwrap();

    pub static ref BLOCK_TIME: HistogramVec = register_histogram_vec!(
        "ethereum_block_time_ms",
        "Wall-clock time between observed blocks in milliseconds",
        &["endpoint"],
        vec![100.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 12000.0, 30000.0]
    ).unwrap();
}

/// Named time series a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    RequestDuration,
    TimeToMine,
    Block,
    GasUsed,
    Tps,
    BlockTime,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::RequestDuration => "ethereum_req_duration",
            Metric::TimeToMine => "ethereum_time_to_mine",
            Metric::Block => "ethereum_block",
            Metric::GasUsed => "ethereum_gas_used",
            Metric::Tps => "ethereum_tps",
            Metric::BlockTime => "ethereum_block_time",
        }
    }
}

/// One observation of a metric
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Metric,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub time: DateTime<Utc>,
}

impl Sample {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            value,
            tags: BTreeMap::new(),
            time: Utc::now(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl ToString) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    fn tag_value(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Destination for samples
pub trait MetricsSink: Send + Sync {
    fn push(&self, sample: Sample);
}

/// Sink that feeds the process-wide Prometheus registry
#[derive(Debug, Default, Clone)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn push(&self, sample: Sample) {
        match sample.metric {
            Metric::RequestDuration => {
                record_request_duration(sample.tag_value("call"), sample.value)
            }
            Metric::TimeToMine => record_time_to_mine(sample.value),
            Metric::Block => {
                let endpoint = sample.tag_value("endpoint");
                BLOCK_NUMBER.with_label_values(&[endpoint]).set(sample.value);
                if let Ok(count) = sample.tag_value("transactions").parse::<f64>() {
                    BLOCK_TRANSACTIONS.with_label_values(&[endpoint]).set(count);
                }
                if let Ok(limit) = sample.tag_value("gas_limit").parse::<f64>() {
                    BLOCK_GAS_LIMIT.with_label_values(&[endpoint]).set(limit);
                }
            }
            Metric::GasUsed => GAS_USED
                .with_label_values(&[sample.tag_value("endpoint")])
                .set(sample.value),
            Metric::Tps => TPS
                .with_label_values(&[sample.tag_value("endpoint")])
                .set(sample.value),
            Metric::BlockTime => BLOCK_TIME
                .with_label_values(&[sample.tag_value("endpoint")])
                .observe(sample.value),
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn push(&self, _sample: Sample) {}
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> LoadResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| LoadTestError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| LoadTestError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_request_duration(call: &str, millis: f64) {
    REQUEST_DURATION.with_label_values(&[call]).observe(millis);
}

pub fn record_time_to_mine(millis: f64) {
    TIME_TO_MINE.with_label_values(&[]).observe(millis);
}

/// Milliseconds as a float, the unit every duration sample uses
pub fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[cfg(test)]
pub mod testing {
    use super::{Metric, MetricsSink, Sample};
    use std::sync::Mutex;

    /// Sink that keeps every sample for assertions
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        samples: Mutex<Vec<Sample>>,
    }

    impl RecordingSink {
        pub fn samples(&self) -> Vec<Sample> {
            self.samples.lock().unwrap().clone()
        }

        pub fn of(&self, metric: Metric) -> Vec<Sample> {
            self.samples()
                .into_iter()
                .filter(|s| s.metric == metric)
                .collect()
        }
    }

    impl MetricsSink for RecordingSink {
        fn push(&self, sample: Sample) {
            self.samples.lock().unwrap().push(sample);
        }
    }
}
