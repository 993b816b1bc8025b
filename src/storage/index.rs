//! In-memory space index shared by the store implementations
//!
//! Mutations are planned first (validated against the current state,
//! producing a `Mutation`) and then committed. The journal store writes the
//! planned mutation to disk between the two steps; recovery replays the
//! same mutations through `commit`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::SpaceFilter;
use crate::error::{Error, Result};
use crate::model::{Lot, LotId, Space, VehicleType};

/// One durable change to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    LotCreated { lot: Lot, spaces: Vec<Space> },
    SpacesReplaced { lot: LotId, spaces: Vec<Space> },
    SpacesDeleted { lot: LotId },
    SpacesCreated { lot: LotId, spaces: Vec<Space> },
    SpacesUpdated { lot: LotId, spaces: Vec<Space> },
}

#[derive(Debug, Clone)]
struct LotTable {
    lot: Lot,
    spaces: BTreeMap<u32, Space>,
}

/// Lots and their spaces, keyed by lot id and space number.
#[derive(Debug)]
pub struct SpaceIndex {
    lots: BTreeMap<LotId, LotTable>,
    next_id: u64,
}

impl SpaceIndex {
    pub fn new() -> Self {
        Self {
            lots: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn table(&self, lot: LotId) -> Result<&LotTable> {
        self.lots.get(&lot).ok_or(Error::LotNotFound(lot))
    }

    fn check_unique(spaces: &[Space]) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for space in spaces {
            if space.number == 0 {
                return Err(Error::InvalidArgument("space numbers start at 1".to_string()));
            }
            if !seen.insert(space.number) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate space number {}",
                    space.number
                )));
            }
        }
        Ok(())
    }

    // ===== Planning =====

    pub fn plan_create_lot(&self, name: Option<String>, spaces: Vec<Space>) -> Result<Mutation> {
        Self::check_unique(&spaces)?;
        let id = LotId::new(self.next_id);
        // The allocator stops at the highest id, which may already be taken
        if self.lots.contains_key(&id) {
            return Err(Error::Storage("lot ids exhausted".to_string()));
        }
        Ok(Mutation::LotCreated {
            lot: Lot::new(id, name),
            spaces,
        })
    }

    pub fn plan_provision(&self, id: LotId, spaces: Vec<Space>) -> Result<Mutation> {
        Self::check_unique(&spaces)?;
        if self.lots.contains_key(&id) {
            Ok(Mutation::SpacesReplaced { lot: id, spaces })
        } else {
            Ok(Mutation::LotCreated {
                lot: Lot::new(id, None),
                spaces,
            })
        }
    }

    pub fn plan_replace(&self, lot: LotId, spaces: Vec<Space>) -> Result<Mutation> {
        self.table(lot)?;
        Self::check_unique(&spaces)?;
        Ok(Mutation::SpacesReplaced { lot, spaces })
    }

    pub fn plan_delete_all(&self, lot: LotId) -> Result<Mutation> {
        self.table(lot)?;
        Ok(Mutation::SpacesDeleted { lot })
    }

    pub fn plan_create_many(&self, lot: LotId, spaces: Vec<Space>) -> Result<Mutation> {
        let table = self.table(lot)?;
        Self::check_unique(&spaces)?;
        if let Some(clash) = spaces.iter().find(|s| table.spaces.contains_key(&s.number)) {
            return Err(Error::InvalidArgument(format!(
                "space {} already exists in lot {}",
                clash.number, lot
            )));
        }
        Ok(Mutation::SpacesCreated { lot, spaces })
    }

    pub fn plan_update(&self, lot: LotId, rows: &[Space]) -> Result<Mutation> {
        let table = self.table(lot)?;
        for row in rows {
            match table.spaces.get(&row.number) {
                None => {
                    return Err(Error::Storage(format!(
                        "space {} does not exist in lot {}",
                        row.number, lot
                    )))
                }
                Some(current) if current.designated != row.designated => {
                    return Err(Error::Storage(format!(
                        "space {} in lot {} cannot change designated type",
                        row.number, lot
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(Mutation::SpacesUpdated {
            lot,
            spaces: rows.to_vec(),
        })
    }

    // ===== Commit =====

    /// Apply a planned (or replayed) mutation, returning the affected lot.
    pub fn commit(&mut self, mutation: Mutation) -> Result<Lot> {
        match mutation {
            Mutation::LotCreated { lot, spaces } => {
                self.next_id = self.next_id.max(lot.id.as_u64().saturating_add(1));
                let table = LotTable {
                    lot: lot.clone(),
                    spaces: spaces.into_iter().map(|s| (s.number, s)).collect(),
                };
                self.lots.insert(lot.id, table);
                Ok(lot)
            }
            Mutation::SpacesReplaced { lot, spaces } => {
                let table = self.lots.get_mut(&lot).ok_or(Error::LotNotFound(lot))?;
                table.spaces = spaces.into_iter().map(|s| (s.number, s)).collect();
                Ok(table.lot.clone())
            }
            Mutation::SpacesDeleted { lot } => {
                let table = self.lots.get_mut(&lot).ok_or(Error::LotNotFound(lot))?;
                table.spaces.clear();
                Ok(table.lot.clone())
            }
            Mutation::SpacesCreated { lot, spaces } | Mutation::SpacesUpdated { lot, spaces } => {
                let table = self.lots.get_mut(&lot).ok_or(Error::LotNotFound(lot))?;
                for space in spaces {
                    table.spaces.insert(space.number, space);
                }
                Ok(table.lot.clone())
            }
        }
    }

    // ===== Queries =====

    pub fn lot(&self, id: LotId) -> Option<Lot> {
        self.lots.get(&id).map(|t| t.lot.clone())
    }

    pub fn lots(&self) -> Vec<Lot> {
        self.lots.values().map(|t| t.lot.clone()).collect()
    }

    pub fn space_count(&self, lot: LotId) -> Result<u64> {
        Ok(self.table(lot)?.spaces.len() as u64)
    }

    pub fn get(&self, lot: LotId, number: u32) -> Result<Option<Space>> {
        Ok(self.table(lot)?.spaces.get(&number).copied())
    }

    pub fn by_type(&self, lot: LotId, designated: VehicleType, occupied: bool) -> Result<Vec<Space>> {
        let filter = SpaceFilter {
            designated: Some(designated),
            occupied: Some(occupied),
        };
        Ok(self
            .table(lot)?
            .spaces
            .values()
            .filter(|s| filter.matches(s))
            .copied()
            .collect())
    }

    pub fn count(&self, lot: LotId, filter: SpaceFilter) -> Result<u64> {
        Ok(self
            .table(lot)?
            .spaces
            .values()
            .filter(|s| filter.matches(s))
            .count() as u64)
    }

    pub fn list(&self, lot: LotId) -> Result<Vec<Space>> {
        Ok(self.table(lot)?.spaces.values().copied().collect())
    }
}

impl Default for SpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_lot(spaces: Vec<Space>) -> (SpaceIndex, LotId) {
        let mut index = SpaceIndex::new();
        let mutation = index.plan_create_lot(Some("north".to_string()), spaces).unwrap();
        let lot = index.commit(mutation).unwrap();
        (index, lot.id)
    }

    #[test]
    fn test_lot_ids_are_allocated_sequentially() {
        let (mut index, first) = index_with_lot(vec![]);
        let second = index
            .commit(index.plan_create_lot(None, vec![]).unwrap())
            .unwrap();
        assert_eq!(first, LotId::new(1));
        assert_eq!(second.id, LotId::new(2));
    }

    #[test]
    fn test_provision_explicit_id_advances_allocator() {
        let mut index = SpaceIndex::new();
        let mutation = index.plan_provision(LotId::new(10), vec![]).unwrap();
        index.commit(mutation).unwrap();

        let next = index.commit(index.plan_create_lot(None, vec![]).unwrap()).unwrap();
        assert_eq!(next.id, LotId::new(11));
    }

    #[test]
    fn test_highest_lot_id_does_not_overflow() {
        let mut index = SpaceIndex::new();
        let top = LotId::new(u64::MAX);
        let mutation = index.plan_provision(top, vec![Space::vacant(1, VehicleType::Car)]).unwrap();
        assert_eq!(index.commit(mutation).unwrap().id, top);

        // Provisioning the same id again replaces its spaces
        let mutation = index.plan_provision(top, vec![]).unwrap();
        index.commit(mutation).unwrap();
        assert_eq!(index.space_count(top).unwrap(), 0);

        assert!(matches!(
            index.plan_create_lot(None, vec![]),
            Err(Error::Storage(_))
        ));
        assert_eq!(index.lots().len(), 1);
    }

    #[test]
    fn test_queries_are_ordered_and_filtered() {
        let spaces = vec![
            Space::vacant(3, VehicleType::Car),
            Space::vacant(1, VehicleType::Car),
            Space::vacant(2, VehicleType::Van).occupied_by(VehicleType::Van),
        ];
        let (index, lot) = index_with_lot(spaces);

        let cars = index.by_type(lot, VehicleType::Car, false).unwrap();
        assert_eq!(cars.iter().map(|s| s.number).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(index.count(lot, SpaceFilter::all().free()).unwrap(), 2);
        assert_eq!(index.count(lot, SpaceFilter::designated(VehicleType::Van)).unwrap(), 1);
    }

    #[test]
    fn test_update_rejects_unknown_rows() {
        let (index, lot) = index_with_lot(vec![Space::vacant(1, VehicleType::Car)]);
        let rows = [
            Space::vacant(1, VehicleType::Car).occupied_by(VehicleType::Car),
            Space::vacant(9, VehicleType::Car).occupied_by(VehicleType::Car),
        ];
        assert!(matches!(index.plan_update(lot, &rows), Err(Error::Storage(_))));
    }

    #[test]
    fn test_update_rejects_designation_change() {
        let (index, lot) = index_with_lot(vec![Space::vacant(1, VehicleType::Car)]);
        let rows = [Space::vacant(1, VehicleType::Van)];
        assert!(index.plan_update(lot, &rows).is_err());
    }

    #[test]
    fn test_unknown_lot() {
        let index = SpaceIndex::new();
        assert_eq!(
            index.list(LotId::new(5)),
            Err(Error::LotNotFound(LotId::new(5)))
        );
    }
}
