// =============================================================================
// Sweep Detector — per-contract recent-exchange ring
// =============================================================================
//
// A sweep is one parent order filled across multiple exchanges within a
// short window. We keep, per contract, a small ring of (exchange, event
// time) pairs; a tick that lands within 500 ms of a prior tick on a
// different exchange is a sweep.
//
// The map is sharded by contract-id hash: the enricher runs on both the WS
// task and the backfill task, and a single mutex over every contract would
// serialise them.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Sweep window in milliseconds.
const WINDOW_MS: i64 = 500;
/// Ring entries kept per contract.
const RING_CAP: usize = 10;
/// Shard count; must be a power of two.
const SHARDS: usize = 16;

type Ring = VecDeque<(i64, i64)>; // (exchange id, event-time ms)

pub struct SweepDetector {
    shards: Vec<Mutex<HashMap<String, Ring>>>,
}

impl SweepDetector {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Record a tick and report whether it completes a sweep: any prior tick
    /// on the same contract within 500 ms on a **different** exchange.
    ///
    /// The tick is appended to the ring either way (trimmed to 10 entries).
    pub fn observe(&self, contract: &str, exchange: i64, ts_ms: i64) -> bool {
        let shard = &self.shards[Self::shard_index(contract)];
        let mut map = shard.lock();
        let ring = map.entry(contract.to_string()).or_default();

        let is_sweep = ring
            .iter()
            .any(|&(ex, t)| ex != exchange && (ts_ms - t).abs() <= WINDOW_MS);

        ring.push_back((exchange, ts_ms));
        while ring.len() > RING_CAP {
            ring.pop_front();
        }

        is_sweep
    }

    fn shard_index(contract: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        contract.hash(&mut hasher);
        (hasher.finish() as usize) & (SHARDS - 1)
    }
}

impl Default for SweepDetector {
    fn default() -> Self {
        Self::new()
    }
}
