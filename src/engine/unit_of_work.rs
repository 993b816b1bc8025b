//! Unit of work pairing space writes with counter updates
//!
//! A `UnitOfWork` owns the row locks of the spaces it may touch. Reads go to
//! the store; writes and counter deltas are staged and applied together by
//! `commit`. Dropping an uncommitted unit discards everything staged.

use std::collections::BTreeMap;
use tracing::{error, warn};

use crate::cache::{AvailabilityCache, CounterDelta};
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{LotId, Space, VehicleType};
use crate::storage::{RowGuard, RowLocks, SpaceStore};

pub struct UnitOfWork<'a> {
    store: &'a dyn SpaceStore,
    cache: &'a dyn AvailabilityCache,
    guard: RowGuard,
    /// Rows as loaded, keyed by number
    loaded: BTreeMap<u32, Space>,
    staged: BTreeMap<u32, Space>,
    deltas: Vec<CounterDelta>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a dyn SpaceStore, cache: &'a dyn AvailabilityCache, guard: RowGuard) -> Self {
        Self {
            store,
            cache,
            guard,
            loaded: BTreeMap::new(),
            staged: BTreeMap::new(),
            deltas: Vec::new(),
        }
    }

    /// Lock `numbers` of `lot` and open a unit over them.
    pub async fn begin(
        store: &'a dyn SpaceStore,
        cache: &'a dyn AvailabilityCache,
        locks: &RowLocks,
        lot: LotId,
        numbers: &[u32],
    ) -> Result<UnitOfWork<'a>> {
        let guard = locks.lock_rows(lot, numbers).await?;
        Ok(Self::new(store, cache, guard))
    }

    pub fn lot(&self) -> LotId {
        self.guard.lot()
    }

    /// Lock additional rows above the ones already held.
    pub async fn extend(&mut self, locks: &RowLocks, numbers: &[u32]) -> Result<()> {
        locks.extend(&mut self.guard, numbers).await
    }

    fn ensure_locked(&self, number: u32) -> Result<()> {
        if self.guard.covers(number) {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "space {} in lot {} is not locked by this unit of work",
                number,
                self.lot()
            )))
        }
    }

    /// Read a locked row. Staged writes are visible to later loads.
    pub async fn load(&mut self, number: u32) -> Result<Option<Space>> {
        self.ensure_locked(number)?;
        if let Some(space) = self.staged.get(&number) {
            return Ok(Some(*space));
        }
        let space = self.store.find_by_number(self.lot(), number).await?;
        if let Some(space) = space {
            self.loaded.insert(number, space);
        }
        Ok(space)
    }

    /// Stage a new version of a previously loaded row.
    pub fn stage(&mut self, space: Space) -> Result<()> {
        self.ensure_locked(space.number)?;
        let Some(original) = self.loaded.get(&space.number) else {
            return Err(Error::InvalidArgument(format!(
                "space {} staged without being loaded",
                space.number
            )));
        };
        if original.designated != space.designated {
            return Err(Error::InvalidArgument(format!(
                "space {} cannot change designation from {} to {}",
                space.number, original.designated, space.designated
            )));
        }
        self.staged.insert(space.number, space);
        Ok(())
    }

    /// Stage a change to the available count of `vehicle_type`.
    pub fn adjust(&mut self, vehicle_type: VehicleType, available: i64) {
        if available != 0 {
            self.deltas.push(CounterDelta::new(vehicle_type, available));
        }
    }

    pub fn staged(&self) -> impl Iterator<Item = &Space> {
        self.staged.values()
    }

    /// Write staged rows, then counter deltas.
    ///
    /// If the counter update fails the rows are restored to their loaded
    /// state before the error is returned. Locks are released afterwards.
    pub async fn commit(self) -> Result<()> {
        let lot = self.lot();
        let rows: Vec<Space> = self.staged.values().copied().collect();

        if !rows.is_empty() {
            self.store.apply(lot, &rows).await?;
        }

        if let Err(e) = self.cache.adjust(lot, &self.deltas).await {
            metrics::COMMIT_ROLLBACKS.inc();
            warn!(lot = %lot, error = %e, "Counter update failed, restoring space rows");

            let originals: Vec<Space> = rows
                .iter()
                .filter_map(|row| self.loaded.get(&row.number).copied())
                .collect();
            if let Err(undo) = self.store.apply(lot, &originals).await {
                error!(
                    lot = %lot,
                    error = %undo,
                    "Failed to restore space rows, cache sync required"
                );
            }
            return Err(e);
        }

        Ok(())
    }
}
