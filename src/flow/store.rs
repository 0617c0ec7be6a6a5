// =============================================================================
// Trade Store — bounded, insertion-ordered flow storage
// =============================================================================
//
// A capped id→flow mapping that preserves insertion order. One writer path
// (the ingestor) takes the lock exclusively for inserts and age sweeps;
// readers take it briefly to clone a value snapshot and then filter/sort
// lock-free. Insertion order is a HashMap plus a VecDeque of ids — the
// deque is authoritative for order, the map for lookup.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use super::record::FlowRecord;

/// Hard cap on retained flows.
pub const MAX_FLOWS: usize = 100_000;

/// Records older than this are dropped by [`TradeStore::age_sweep`].
pub const MAX_AGE: Duration = Duration::from_secs(120);

struct Inner {
    map: HashMap<String, FlowRecord>,
    order: VecDeque<String>,
}

pub struct TradeStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FLOWS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a flow, dropping the oldest-inserted entries once at capacity.
    pub fn insert(&self, flow: FlowRecord) {
        let mut inner = self.inner.write();

        if inner.map.contains_key(&flow.id) {
            // Same observation re-ingested: refresh the value, keep its slot.
            inner.map.insert(flow.id.clone(), flow);
            return;
        }

        while inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
            } else {
                break;
            }
        }

        inner.order.push_back(flow.id.clone());
        inner.map.insert(flow.id.clone(), flow);
    }

    /// Remove every record whose event time is older than `max_age`.
    /// Returns the number of records removed.
    pub fn age_sweep(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut inner = self.inner.write();

        let before = inner.map.len();
        inner.map.retain(|_, flow| flow.timestamp >= cutoff);
        // Order stays consistent: drop ids whose record is gone.
        let map = &inner.map;
        let retained: VecDeque<String> = inner
            .order
            .iter()
            .filter(|id| map.contains_key(*id))
            .cloned()
            .collect();
        inner.order = retained;

        let removed = before - inner.map.len();
        if removed > 0 {
            debug!(removed, remaining = inner.map.len(), "age sweep completed");
        }
        removed
    }

    /// Clone the current values in insertion order. Readers evaluate
    /// filters against this snapshot without holding the lock.
    pub fn snapshot(&self) -> Vec<FlowRecord> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.map.get(id).cloned())
            .collect()
    }
}

impl Default for TradeStore {
    fn default() -> Self {
        Self::new()
    }
}
