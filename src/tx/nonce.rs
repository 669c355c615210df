//! Nonce management for concurrent virtual users
//!
//! Handles:
//! - Local nonce tracking so VUs sharing one key never collide
//! - Releasing a nonce whose submission failed
//! - Resyncing with the node after "nonce too low"

use crate::chain::ChainClient;
use crate::error::{LoadResult, LoadTestError};

use dashmap::DashSet;
use ethers::types::Address;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct NonceState {
    /// Next fresh nonce, `None` until initialized
    next: Option<u64>,
    /// Handed out earlier but never submitted; reissued before fresh ones
    released: BTreeSet<u64>,
}

/// Hands out sequential nonces for one sender
pub struct NonceManager {
    /// Sender address
    address: Address,
    state: Mutex<NonceState>,
    /// Allocated but not yet confirmed sent
    in_flight: DashSet<u64>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new(address: Address) -> Self {
        Self {
            address,
            state: Mutex::new(NonceState::default()),
            in_flight: DashSet::new(),
        }
    }

    /// Initialize from the node's pending transaction count
    pub async fn init(&self, chain: &dyn ChainClient) -> LoadResult<()> {
        let on_chain = chain.get_nonce(self.address).await?;
        let mut state = self.state.lock().await;
        state.next = Some(on_chain);
        state.released.clear();
        debug!("Initialized nonce for {:?}: {}", self.address, on_chain);
        Ok(())
    }

    /// Get the lowest released nonce, or the next fresh one
    pub async fn allocate(&self) -> LoadResult<u64> {
        let mut state = self.state.lock().await;
        let next = state.next.ok_or_else(|| {
            LoadTestError::Nonce(format!("nonce manager for {:?} not initialized", self.address))
        })?;

        let nonce = match state.released.pop_first() {
            Some(nonce) => nonce,
            None => {
                state.next = Some(next + 1);
                next
            }
        };
        self.in_flight.insert(nonce);
        Ok(nonce)
    }

    /// The transaction carrying `nonce` reached the node
    pub fn mark_sent(&self, nonce: u64) {
        self.in_flight.remove(&nonce);
    }

    /// Return a nonce whose submission failed so it is issued again
    pub async fn release(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        self.in_flight.remove(&nonce);

        let Some(mut next) = state.next else {
            return;
        };
        if nonce >= next {
            return;
        }
        state.released.insert(nonce);

        // Fold released nonces at the top back into the fresh counter
        while next > 0 && state.released.remove(&(next - 1)) {
            next -= 1;
        }
        state.next = Some(next);
    }

    /// Reconcile with the node's pending count.
    ///
    /// Released nonces the node already counts are dropped. The counter is
    /// rewound to the node's count unless a higher nonce is still in flight.
    pub async fn sync(&self, chain: &dyn ChainClient) -> LoadResult<()> {
        let on_chain = chain.get_nonce(self.address).await?;
        let mut state = self.state.lock().await;

        if let Some(local) = state.next {
            if on_chain > local {
                warn!(
                    "Nonce for {:?} behind node: local {}, node {}",
                    self.address, local, on_chain
                );
            }
        }

        let highest_in_flight = self.in_flight.iter().map(|n| *n + 1).max().unwrap_or(0);
        let next = on_chain.max(highest_in_flight);
        state.released.retain(|n| *n >= on_chain && *n < next);
        state.next = Some(next);
        Ok(())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
