//! In-memory space store
//!
//! Keeps everything in a `SpaceIndex` behind a lock. Used by tests and by
//! deployments that do not need spaces to survive a restart.

use crate::error::Result;
use crate::model::{Lot, LotId, Space, VehicleType};
use crate::storage::index::SpaceIndex;
use crate::storage::store::{SpaceFilter, SpaceStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// In-memory space store
#[derive(Clone, Default)]
pub struct MemorySpaceStore {
    index: Arc<RwLock<SpaceIndex>>,
}

impl MemorySpaceStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            index: Arc::new(RwLock::new(SpaceIndex::new())),
        }
    }

    /// Number of lots stored
    pub fn len(&self) -> usize {
        self.index.read().lots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SpaceStore for MemorySpaceStore {
    async fn create_lot(&self, name: Option<String>, spaces: Vec<Space>) -> Result<Lot> {
        let mut index = self.index.write();
        let mutation = index.plan_create_lot(name, spaces)?;
        index.commit(mutation)
    }

    async fn provision_lot(&self, id: LotId, spaces: Vec<Space>) -> Result<Lot> {
        let mut index = self.index.write();
        let mutation = index.plan_provision(id, spaces)?;
        index.commit(mutation)
    }

    async fn find_lot(&self, id: LotId) -> Result<Option<Lot>> {
        Ok(self.index.read().lot(id))
    }

    async fn list_lots(&self) -> Result<Vec<Lot>> {
        Ok(self.index.read().lots())
    }

    async fn replace_spaces(&self, lot: LotId, spaces: Vec<Space>) -> Result<()> {
        let mut index = self.index.write();
        let mutation = index.plan_replace(lot, spaces)?;
        index.commit(mutation)?;
        Ok(())
    }

    async fn delete_all(&self, lot: LotId) -> Result<u64> {
        let mut index = self.index.write();
        let removed = index.space_count(lot)?;
        let mutation = index.plan_delete_all(lot)?;
        index.commit(mutation)?;
        Ok(removed)
    }

    async fn create_many(&self, lot: LotId, spaces: Vec<Space>) -> Result<()> {
        let mut index = self.index.write();
        let mutation = index.plan_create_many(lot, spaces)?;
        index.commit(mutation)?;
        Ok(())
    }

    async fn find_by_number(&self, lot: LotId, number: u32) -> Result<Option<Space>> {
        self.index.read().get(lot, number)
    }

    async fn find_by_type(
        &self,
        lot: LotId,
        designated: VehicleType,
        occupied: bool,
    ) -> Result<Vec<Space>> {
        self.index.read().by_type(lot, designated, occupied)
    }

    async fn count(&self, lot: LotId, filter: SpaceFilter) -> Result<u64> {
        self.index.read().count(lot, filter)
    }

    async fn list_spaces(&self, lot: LotId) -> Result<Vec<Space>> {
        self.index.read().list(lot)
    }

    async fn apply(&self, lot: LotId, rows: &[Space]) -> Result<()> {
        let mut index = self.index.write();
        let mutation = index.plan_update(lot, rows)?;
        index.commit(mutation)?;
        Ok(())
    }
}
