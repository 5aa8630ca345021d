//! Per-slot viewer counter feeding the demand multiplier.
//!
//! Every listing or detail view of a slot bumps its counter. Counters are never
//! decremented; they disappear on reset or when their TTL runs out, so the value
//! is a recent-interest heuristic rather than a live concurrent-viewer count.

use std::sync::Arc;

use chrono::Duration;

use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::model::SlotId;

#[derive(Clone)]
pub struct DemandTracker {
    viewers: Arc<TtlCache<SlotId, u32>>,
}

impl DemandTracker {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            viewers: Arc::new(TtlCache::new(ttl, clock)),
        }
    }

    /// Record one view and return the new count.
    pub fn increment_viewer(&self, slot: SlotId) -> u32 {
        self.viewers
            .update(slot, |count| count.copied().unwrap_or(0).saturating_add(1))
    }

    pub fn viewer_count(&self, slot: SlotId) -> u32 {
        self.viewers.get(&slot).unwrap_or(0)
    }

    pub fn reset(&self, slot: SlotId) {
        self.viewers.remove(&slot);
    }
}
