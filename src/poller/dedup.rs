//! Per-endpoint block deduplication
//!
//! Several pollers may watch the same endpoint; a block's samples must be
//! emitted by exactly one of them. The check-and-insert runs under the
//! DashMap shard lock for the endpoint and nothing else.

use dashmap::DashMap;
use std::collections::BTreeSet;

/// Default number of block numbers remembered per endpoint
pub const DEFAULT_RETAIN_BLOCKS: usize = 256;

/// Bounded set of `(endpoint, block_number)` pairs already reported
#[derive(Debug)]
pub struct BlockDedup {
    retain: usize,
    seen: DashMap<String, BTreeSet<u64>>,
}

impl BlockDedup {
    pub fn new(retain: usize) -> Self {
        Self {
            retain: retain.max(1),
            seen: DashMap::new(),
        }
    }

    /// Record `number` for `endpoint`; `true` only for the first caller.
    ///
    /// Numbers older than everything retained are treated as already seen,
    /// so eviction never lets a stale block be reported twice.
    pub fn first_sighting(&self, endpoint: &str, number: u64) -> bool {
        let mut seen = self.seen.entry(endpoint.to_string()).or_default();

        if seen.len() >= self.retain {
            if let Some(&oldest) = seen.first() {
                if number < oldest {
                    return false;
                }
            }
        }

        if !seen.insert(number) {
            return false;
        }

        while seen.len() > self.retain {
            seen.pop_first();
        }
        true
    }

    /// Block numbers currently remembered for `endpoint`
    pub fn retained(&self, endpoint: &str) -> usize {
        self.seen.get(endpoint).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for BlockDedup {
    fn default() -> Self {
        Self::new(DEFAULT_RETAIN_BLOCKS)
    }
}
