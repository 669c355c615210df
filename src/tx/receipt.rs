//! Receipt awaiting
//!
//! A submitted transaction is polled for at a fixed interval until the node
//! returns its receipt. "Not found" is the normal state while the
//! transaction sits in the mempool and is never surfaced; any other error
//! ends the wait. The loop has no deadline of its own: callers that need a
//! bound use [`ReceiptTask::wait_timeout`] or [`ReceiptTask::cancel`].

use crate::chain::{ChainClient, Receipt};
use crate::error::{LoadResult, LoadTestError};
use crate::metrics::{millis, Metric, MetricsSink, Sample};

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default spacing between receipt polls
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Progress of one awaited hash, owned by its poll loop
#[derive(Debug)]
struct ReceiptPollState {
    hash: H256,
    started_at: Instant,
    polls: u32,
}

impl ReceiptPollState {
    fn new(hash: H256) -> Self {
        Self {
            hash,
            started_at: Instant::now(),
            polls: 0,
        }
    }
}

/// Polls for receipts and reports time to mine
#[derive(Clone)]
pub struct ReceiptAwaiter {
    chain: Arc<dyn ChainClient>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
}

impl ReceiptAwaiter {
    pub fn new(chain: Arc<dyn ChainClient>, sink: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self {
            chain,
            sink,
            interval,
        }
    }

    /// Poll until the receipt appears or a non-retryable error occurs
    pub async fn await_receipt(&self, hash: H256) -> LoadResult<Receipt> {
        let mut state = ReceiptPollState::new(hash);

        loop {
            state.polls += 1;
            match self.chain.get_transaction_receipt(state.hash).await {
                Ok(Some(receipt)) => {
                    let elapsed = state.started_at.elapsed();
                    debug!(
                        "Receipt for {:?} after {:?} and {} polls (block {:?})",
                        state.hash, elapsed, state.polls, receipt.block_number
                    );
                    self.sink
                        .push(Sample::new(Metric::TimeToMine, millis(elapsed)));
                    return Ok(receipt);
                }
                Ok(None) | Err(LoadTestError::NotFound(_)) => {
                    trace!("Receipt for {:?} not available yet", state.hash);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run [`ReceiptAwaiter::await_receipt`] in the background
    pub fn spawn(&self, hash: H256) -> ReceiptTask {
        let awaiter = self.clone();
        let handle = tokio::spawn(async move { awaiter.await_receipt(hash).await });
        ReceiptTask { hash, handle }
    }
}

/// Background receipt wait. Dropping the task cancels it.
pub struct ReceiptTask {
    hash: H256,
    handle: JoinHandle<LoadResult<Receipt>>,
}

impl ReceiptTask {
    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop polling. No time-to-mine sample is emitted for a cancelled wait.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Wait for the outcome
    pub async fn wait(mut self) -> LoadResult<Receipt> {
        Self::join(&mut self.handle).await
    }

    /// Wait at most `limit`, cancelling the poll loop when it runs out
    pub async fn wait_timeout(mut self, limit: Duration) -> LoadResult<Receipt> {
        match tokio::time::timeout(limit, Self::join(&mut self.handle)).await {
            Ok(result) => result,
            Err(_) => {
                self.handle.abort();
                Err(LoadTestError::Timeout {
                    operation: format!("receipt of {:?}", self.hash),
                })
            }
        }
    }

    async fn join(handle: &mut JoinHandle<LoadResult<Receipt>>) -> LoadResult<Receipt> {
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(LoadTestError::Cancelled),
            Err(e) => Err(LoadTestError::Internal(format!("receipt task failed: {}", e))),
        }
    }
}

impl Drop for ReceiptTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::metrics::testing::RecordingSink;
    use mockall::Sequence;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn awaiter(chain: MockChainClient, sink: Arc<RecordingSink>) -> ReceiptAwaiter {
        ReceiptAwaiter::new(Arc::new(chain), sink, RECEIPT_POLL_INTERVAL)
    }

    fn mined(hash: H256) -> Receipt {
        Receipt {
            transaction_hash: hash,
            block_number: Some(5),
            status: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_after_not_found() {
        let hash = H256::repeat_byte(1);
        let polls = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MockChainClient::new();
        let mut seq = Sequence::new();

        let seen = polls.clone();
        chain
            .expect_get_transaction_receipt()
            .times(3)
            .in_sequence(&mut seq)
            .returning(move |_| {
                seen.lock().unwrap().push(Instant::now());
                Ok(None)
            });
        let seen = polls.clone();
        chain
            .expect_get_transaction_receipt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |h| {
                seen.lock().unwrap().push(Instant::now());
                Ok(Some(mined(h)))
            });

        let sink = Arc::new(RecordingSink::default());
        let receipt = assert_ok!(awaiter(chain, sink.clone()).await_receipt(hash).await);
        assert_eq!(receipt.transaction_hash, hash);

        let polls = polls.lock().unwrap();
        assert_eq!(polls.len(), 4);
        for pair in polls.windows(2) {
            assert!(pair[1] - pair[0] >= RECEIPT_POLL_INTERVAL);
        }

        let samples = sink.of(Metric::TimeToMine);
        assert_eq!(samples.len(), 1);
        assert!(samples[0].value >= 300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_error_is_retried() {
        let hash = H256::repeat_byte(2);
        let mut chain = MockChainClient::new();
        let mut seq = Sequence::new();
        chain
            .expect_get_transaction_receipt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LoadTestError::NotFound("receipt".into())));
        chain
            .expect_get_transaction_receipt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|h| Ok(Some(mined(h))));

        let sink = Arc::new(RecordingSink::default());
        assert_ok!(awaiter(chain, sink).await_receipt(hash).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_not_retried() {
        let mut chain = MockChainClient::new();
        chain
            .expect_get_transaction_receipt()
            .times(1)
            .returning(|_| Err(LoadTestError::transport("http://localhost:8545", "connection refused")));

        let sink = Arc::new(RecordingSink::default());
        let err = assert_err!(
            awaiter(chain, sink.clone())
                .await_receipt(H256::repeat_byte(3))
                .await
        );
        assert!(matches!(err, LoadTestError::Transport { .. }));
        assert!(sink.samples().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_resolves() {
        let mut chain = MockChainClient::new();
        chain
            .expect_get_transaction_receipt()
            .returning(|h| Ok(Some(mined(h))));

        let sink = Arc::new(RecordingSink::default());
        let task = awaiter(chain, sink.clone()).spawn(H256::repeat_byte(4));
        assert_eq!(task.hash(), H256::repeat_byte(4));
        assert_ok!(task.wait().await);
        assert_eq!(sink.of(Metric::TimeToMine).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_without_sample() {
        let mut chain = MockChainClient::new();
        chain.expect_get_transaction_receipt().returning(|_| Ok(None));

        let sink = Arc::new(RecordingSink::default());
        let task = awaiter(chain, sink.clone()).spawn(H256::repeat_byte(5));
        let err = assert_err!(task.wait_timeout(Duration::from_secs(1)).await);
        assert!(matches!(err, LoadTestError::Timeout { .. }));
        assert!(sink.of(Metric::TimeToMine).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_cancelled() {
        let mut chain = MockChainClient::new();
        chain.expect_get_transaction_receipt().returning(|_| Ok(None));

        let sink = Arc::new(RecordingSink::default());
        let task = awaiter(chain, sink.clone()).spawn(H256::repeat_byte(6));
        task.cancel();
        let err = assert_err!(task.wait().await);
        assert!(matches!(err, LoadTestError::Cancelled));
        assert!(sink.samples().is_empty());
    }
}
