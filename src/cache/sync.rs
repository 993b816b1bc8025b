//! Cache synchronizer
//!
//! Rebuilds a lot's counters from the space store and overwrites the cache.
//! Used after (re)provisioning, to warm the cache at startup, and to repair
//! drift.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::AvailabilityCache;
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{LotCounters, LotId};
use crate::storage::{LotGuard, RowLocks, SpaceStore};

/// Comparison of cached counters against the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheDrift {
    pub lot: LotId,
    /// `None` when the lot was not cached
    pub cached: Option<LotCounters>,
    pub actual: LotCounters,
}

impl CacheDrift {
    pub fn is_consistent(&self) -> bool {
        self.cached == Some(self.actual)
    }
}

/// Recomputes availability counters from the space store.
#[derive(Clone)]
pub struct CacheSynchronizer {
    store: Arc<dyn SpaceStore>,
    cache: Arc<dyn AvailabilityCache>,
    locks: Arc<RowLocks>,
}

impl CacheSynchronizer {
    pub fn new(
        store: Arc<dyn SpaceStore>,
        cache: Arc<dyn AvailabilityCache>,
        locks: Arc<RowLocks>,
    ) -> Self {
        Self { store, cache, locks }
    }

    /// Count the lot's spaces from one store snapshot.
    async fn snapshot(&self, lot: LotId) -> Result<LotCounters> {
        if self.store.find_lot(lot).await?.is_none() {
            return Err(Error::LotNotFound(lot));
        }
        let spaces = self.store.list_spaces(lot).await?;
        Ok(LotCounters::tally(&spaces))
    }

    /// Recompute and overwrite every counter of `lot`.
    ///
    /// Takes the lot lock exclusively so no allocation can commit between
    /// the count and the overwrite.
    #[instrument(skip(self))]
    pub async fn sync(&self, lot: LotId) -> Result<LotCounters> {
        let guard = self.locks.lock_lot(lot).await?;
        self.sync_locked(&guard).await
    }

    /// `sync` for a caller that already holds the lot lock.
    pub async fn sync_locked(&self, guard: &LotGuard) -> Result<LotCounters> {
        let lot = guard.lot();
        let counters = self.snapshot(lot).await?;
        self.cache.replace_lot(lot, counters).await?;
        metrics::CACHE_SYNCS.inc();
        info!(
            lot = %lot,
            total = counters.lot.total,
            available = counters.lot.available,
            "Availability cache synchronized"
        );
        Ok(counters)
    }

    /// Sync every lot known to the store. Returns how many were synced.
    pub async fn sync_all(&self) -> Result<usize> {
        let lots = self.store.list_lots().await?;
        for lot in &lots {
            self.sync(lot.id).await?;
        }
        Ok(lots.len())
    }

    /// Compare the cache against the store without changing either.
    #[instrument(skip(self))]
    pub async fn verify(&self, lot: LotId) -> Result<CacheDrift> {
        let _guard = self.locks.lock_lot(lot).await?;
        let actual = self.snapshot(lot).await?;
        let cached = self.cache.load_lot(lot).await?;
        let drift = CacheDrift { lot, cached, actual };
        if !drift.is_consistent() {
            metrics::CACHE_DRIFT.inc();
            warn!(lot = %lot, cached = ?drift.cached, actual = ?drift.actual, "Availability cache drift detected");
        }
        Ok(drift)
    }
}
