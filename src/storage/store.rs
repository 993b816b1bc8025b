//! Space store trait

use crate::error::Result;
use crate::model::{Lot, LotId, Space, VehicleType};
use async_trait::async_trait;

/// Filter for `SpaceStore::count`. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceFilter {
    pub designated: Option<VehicleType>,
    pub occupied: Option<bool>,
}

impl SpaceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn designated(vehicle_type: VehicleType) -> Self {
        Self {
            designated: Some(vehicle_type),
            occupied: None,
        }
    }

    pub fn free(mut self) -> Self {
        self.occupied = Some(false);
        self
    }

    pub fn matches(&self, space: &Space) -> bool {
        self.designated.map_or(true, |t| space.designated == t)
            && self.occupied.map_or(true, |o| space.is_occupied() == o)
    }
}

/// Authoritative store of lots and their space records.
///
/// Every method addressing an unknown lot fails with `LotNotFound`. Writes
/// that touch several rows are applied all-or-nothing.
#[async_trait]
pub trait SpaceStore: Send + Sync {
    /// Create a lot under a freshly allocated id, populated with `spaces`.
    async fn create_lot(&self, name: Option<String>, spaces: Vec<Space>) -> Result<Lot>;

    /// Create the lot `id` if it does not exist, and replace its spaces.
    async fn provision_lot(&self, id: LotId, spaces: Vec<Space>) -> Result<Lot>;

    async fn find_lot(&self, id: LotId) -> Result<Option<Lot>>;

    async fn list_lots(&self) -> Result<Vec<Lot>>;

    /// Delete every space of an existing lot and insert `spaces` in one unit.
    async fn replace_spaces(&self, lot: LotId, spaces: Vec<Space>) -> Result<()>;

    /// Delete every space of the lot, returning how many were removed.
    async fn delete_all(&self, lot: LotId) -> Result<u64>;

    /// Insert new spaces. Space numbers must not already exist in the lot.
    async fn create_many(&self, lot: LotId, spaces: Vec<Space>) -> Result<()>;

    async fn find_by_number(&self, lot: LotId, number: u32) -> Result<Option<Space>>;

    /// Spaces of one designated type and occupancy, ascending by number.
    async fn find_by_type(
        &self,
        lot: LotId,
        designated: VehicleType,
        occupied: bool,
    ) -> Result<Vec<Space>>;

    async fn count(&self, lot: LotId, filter: SpaceFilter) -> Result<u64>;

    /// All spaces of the lot, ascending by number.
    async fn list_spaces(&self, lot: LotId) -> Result<Vec<Space>>;

    /// Overwrite existing rows. Fails without writing anything if any row
    /// does not exist or would change its designated type.
    async fn apply(&self, lot: LotId, rows: &[Space]) -> Result<()>;
}
