//! Availability cache
//!
//! Per-lot counters of total and available spaces, lot-wide and per
//! designated vehicle type. The cache is derived state: the space store is
//! authoritative and `CacheSynchronizer` can rebuild any lot from it.
//!
//! ```text
//! lot 7
//!   ├─→ lot-wide    total=18 available=11
//!   ├─→ car         total=10 available=4
//!   ├─→ motorcycle  total=5  available=5
//!   └─→ van         total=3  available=2
//! ```

pub mod memory;
pub mod sync;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Counters, LotCounters, LotId, VehicleType};

pub use memory::{CacheStats, MemoryAvailabilityCache};
pub use sync::{CacheDrift, CacheSynchronizer};

/// Address of one counter pair. `vehicle_type: None` is the lot-wide pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub lot: LotId,
    pub vehicle_type: Option<VehicleType>,
}

impl CounterKey {
    pub fn lot_wide(lot: LotId) -> Self {
        Self {
            lot,
            vehicle_type: None,
        }
    }

    pub fn typed(lot: LotId, vehicle_type: VehicleType) -> Self {
        Self {
            lot,
            vehicle_type: Some(vehicle_type),
        }
    }
}

/// Change to the `available` count of one designated type.
///
/// Applying a delta moves both the typed and the lot-wide counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub vehicle_type: VehicleType,
    pub available: i64,
}

impl CounterDelta {
    pub fn new(vehicle_type: VehicleType, available: i64) -> Self {
        Self {
            vehicle_type,
            available,
        }
    }
}

/// Counter store shared by the allocation engine and the synchronizer.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    /// Read one counter pair. `None` when the lot has not been synced.
    async fn get(&self, key: CounterKey) -> Result<Option<Counters>>;

    /// Overwrite one counter pair.
    async fn set(&self, key: CounterKey, counters: Counters) -> Result<()>;

    /// Apply all deltas to the lot's `available` counters as one update.
    ///
    /// A lot that is not cached is left alone: its next read goes back to
    /// the store, which already reflects the change.
    async fn adjust(&self, lot: LotId, deltas: &[CounterDelta]) -> Result<()>;

    /// Read every counter of a lot at once.
    async fn load_lot(&self, lot: LotId) -> Result<Option<LotCounters>>;

    /// Overwrite every counter of a lot at once.
    async fn replace_lot(&self, lot: LotId, counters: LotCounters) -> Result<()>;

    async fn remove_lot(&self, lot: LotId) -> Result<()>;
}
