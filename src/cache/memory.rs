//! In-process availability cache

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::{AvailabilityCache, CounterDelta, CounterKey};
use crate::error::Result;
use crate::model::{Counters, LotCounters, LotId};

/// Counter cache keyed by lot.
///
/// All counters of a lot live in one map entry, so a multi-counter
/// adjustment is applied under that entry's lock and is never observed
/// half-done.
#[derive(Default)]
pub struct MemoryAvailabilityCache {
    lots: DashMap<LotId, LotCounters>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl MemoryAvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hit_count } else { &self.miss_count };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            lots: self.lots.len(),
        }
    }
}

#[async_trait]
impl AvailabilityCache for MemoryAvailabilityCache {
    async fn get(&self, key: CounterKey) -> Result<Option<Counters>> {
        let counters = self.lots.get(&key.lot).map(|c| c.get(key.vehicle_type));
        self.record(counters.is_some());
        Ok(counters)
    }

    async fn set(&self, key: CounterKey, counters: Counters) -> Result<()> {
        *self.lots.entry(key.lot).or_default().get_mut(key.vehicle_type) = counters;
        Ok(())
    }

    async fn adjust(&self, lot: LotId, deltas: &[CounterDelta]) -> Result<()> {
        let Some(mut entry) = self.lots.get_mut(&lot) else {
            debug!(lot = %lot, "Counter adjustment for uncached lot skipped");
            return Ok(());
        };

        for delta in deltas {
            for key in [Some(delta.vehicle_type), None] {
                let counter = entry.get_mut(key);
                let next = counter.available as i64 + delta.available;
                if next < 0 {
                    warn!(
                        lot = %lot,
                        vehicle_type = ?key,
                        available = counter.available,
                        delta = delta.available,
                        "Available counter would go negative, clamping to zero"
                    );
                }
                counter.available = next.max(0) as u64;
            }
        }
        Ok(())
    }

    async fn load_lot(&self, lot: LotId) -> Result<Option<LotCounters>> {
        let counters = self.lots.get(&lot).map(|c| *c);
        self.record(counters.is_some());
        Ok(counters)
    }

    async fn replace_lot(&self, lot: LotId, counters: LotCounters) -> Result<()> {
        self.lots.insert(lot, counters);
        Ok(())
    }

    async fn remove_lot(&self, lot: LotId) -> Result<()> {
        self.lots.remove(&lot);
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub lots: usize,
}
