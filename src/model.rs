//! Domain model
//!
//! ```text
//! Lot (LotId → name)
//!   └─→ Spaces (number → designated type, occupant)
//! ```
//!
//! A space's designated type is fixed when the lot is provisioned. Only the
//! occupant changes afterwards, and a space is occupied exactly when it has
//! an occupant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of a parking lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(u64);

impl LotId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(LotId)
            .map_err(|_| Error::InvalidArgument(format!("invalid lot id: {:?}", s)))
    }
}

impl From<u64> for LotId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of vehicle a space is provisioned for, or that occupies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Van,
}

impl VehicleType {
    /// All vehicle types in canonical order.
    pub const ALL: [VehicleType; 3] = [VehicleType::Car, VehicleType::Motorcycle, VehicleType::Van];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Van => "van",
        }
    }

    /// Position in `ALL`, used to index per-type arrays.
    pub fn index(&self) -> usize {
        match self {
            VehicleType::Car => 0,
            VehicleType::Motorcycle => 1,
            VehicleType::Van => 2,
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(VehicleType::Car),
            "motorcycle" => Ok(VehicleType::Motorcycle),
            "van" => Ok(VehicleType::Van),
            _ => Err(Error::VehicleTypeUnknown(s.to_string())),
        }
    }
}

/// Parking lot metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    /// Display name. Lots created implicitly by id have none.
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(id: LotId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// A numbered parking space.
///
/// Occupancy is derived from `occupant`, so a space can never be occupied
/// without an occupant type or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub number: u32,
    pub designated: VehicleType,
    pub occupant: Option<VehicleType>,
}

impl Space {
    /// A free space provisioned for `designated`.
    pub fn vacant(number: u32, designated: VehicleType) -> Self {
        Self {
            number,
            designated,
            occupant: None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// Copy of this space occupied by `occupant`.
    pub fn occupied_by(self, occupant: VehicleType) -> Self {
        Self {
            occupant: Some(occupant),
            ..self
        }
    }

    /// Copy of this space with its occupant removed.
    pub fn vacated(self) -> Self {
        Self {
            occupant: None,
            ..self
        }
    }
}

/// Requested number of spaces per vehicle type, in provisioning order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capacities(Vec<(VehicleType, u32)>);

impl Capacities {
    /// Build from `(type name, count)` pairs.
    ///
    /// Fails with `VehicleTypeUnknown` for an unrecognized name and with
    /// `InvalidArgument` when a type is listed twice.
    pub fn from_names<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let mut entries: Vec<(VehicleType, u32)> = Vec::new();
        for (name, count) in pairs {
            let vehicle_type: VehicleType = name.as_ref().parse()?;
            if entries.iter().any(|(t, _)| *t == vehicle_type) {
                return Err(Error::InvalidArgument(format!(
                    "capacity for {} given more than once",
                    vehicle_type
                )));
            }
            entries.push((vehicle_type, count));
        }
        Ok(Self(entries))
    }

    /// Builder-style helper for typed callers.
    pub fn with(mut self, vehicle_type: VehicleType, count: u32) -> Self {
        match self.0.iter_mut().find(|(t, _)| *t == vehicle_type) {
            Some(entry) => entry.1 = count,
            None => self.0.push((vehicle_type, count)),
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (VehicleType, u32)> + '_ {
        self.0.iter().copied()
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|(_, c)| u64::from(*c)).sum()
    }

    /// Lay out vacant spaces numbered densely from 1.
    ///
    /// Fails with `InvalidArgument` when the spaces cannot all be numbered.
    pub fn layout(&self) -> Result<Vec<Space>> {
        let too_many = || {
            Error::InvalidArgument(format!(
                "{} spaces exceed the highest space number {}",
                self.total(),
                u32::MAX
            ))
        };
        if self.total() > u64::from(u32::MAX) {
            return Err(too_many());
        }

        let mut spaces = Vec::with_capacity(self.total() as usize);
        let mut next = Some(1u32);
        for (vehicle_type, count) in self.iter() {
            for _ in 0..count {
                let number = next.ok_or_else(too_many)?;
                spaces.push(Space::vacant(number, vehicle_type));
                next = number.checked_add(1);
            }
        }
        Ok(spaces)
    }
}

/// Total and available space counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: u64,
    pub available: u64,
}

/// Lot-wide counters plus one pair per vehicle type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotCounters {
    pub lot: Counters,
    pub by_type: [Counters; 3],
}

impl LotCounters {
    pub fn for_type(&self, vehicle_type: VehicleType) -> Counters {
        self.by_type[vehicle_type.index()]
    }

    /// Counters for `None` (lot-wide) or a single type.
    pub fn get(&self, vehicle_type: Option<VehicleType>) -> Counters {
        match vehicle_type {
            Some(t) => self.for_type(t),
            None => self.lot,
        }
    }

    pub fn get_mut(&mut self, vehicle_type: Option<VehicleType>) -> &mut Counters {
        match vehicle_type {
            Some(t) => &mut self.by_type[t.index()],
            None => &mut self.lot,
        }
    }

    /// Count a set of spaces.
    pub fn tally<'a, I: IntoIterator<Item = &'a Space>>(spaces: I) -> Self {
        let mut counters = LotCounters::default();
        for space in spaces {
            let free = u64::from(!space.is_occupied());
            counters.lot.total += 1;
            counters.lot.available += free;
            let typed = &mut counters.by_type[space.designated.index()];
            typed.total += 1;
            typed.available += free;
        }
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_type_parsing() {
        assert_eq!("car".parse::<VehicleType>().unwrap(), VehicleType::Car);
        assert_eq!(" Van ".parse::<VehicleType>().unwrap(), VehicleType::Van);
        assert_eq!(
            "truck".parse::<VehicleType>(),
            Err(Error::VehicleTypeUnknown("truck".to_string()))
        );
    }

    #[test]
    fn test_space_occupancy_follows_occupant() {
        let space = Space::vacant(4, VehicleType::Car);
        assert!(!space.is_occupied());

        let taken = space.occupied_by(VehicleType::Motorcycle);
        assert!(taken.is_occupied());
        assert_eq!(taken.designated, VehicleType::Car);

        let freed = taken.vacated();
        assert!(!freed.is_occupied());
        assert_eq!(freed.occupant, None);
    }

    #[test]
    fn test_capacities_layout_is_dense() {
        let capacities =
            Capacities::from_names([("car", 2), ("motorcycle", 0), ("van", 1)]).unwrap();
        let spaces = capacities.layout().unwrap();

        assert_eq!(spaces.len(), 3);
        assert_eq!(spaces[0], Space::vacant(1, VehicleType::Car));
        assert_eq!(spaces[1], Space::vacant(2, VehicleType::Car));
        assert_eq!(spaces[2], Space::vacant(3, VehicleType::Van));
    }

    #[test]
    fn test_capacities_beyond_numbering_are_rejected() {
        let capacities = Capacities::default()
            .with(VehicleType::Car, u32::MAX)
            .with(VehicleType::Van, 1);
        assert_eq!(capacities.total(), u64::from(u32::MAX) + 1);
        assert!(matches!(capacities.layout(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_capacities_reject_unknown_and_duplicate() {
        assert!(matches!(
            Capacities::from_names([("bus", 1)]),
            Err(Error::VehicleTypeUnknown(_))
        ));
        assert!(matches!(
            Capacities::from_names([("car", 1), ("CAR", 2)]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tally() {
        let spaces = vec![
            Space::vacant(1, VehicleType::Car),
            Space::vacant(2, VehicleType::Car).occupied_by(VehicleType::Car),
            Space::vacant(3, VehicleType::Van),
        ];
        let counters = LotCounters::tally(&spaces);

        assert_eq!(counters.lot, Counters { total: 3, available: 2 });
        assert_eq!(counters.for_type(VehicleType::Car), Counters { total: 2, available: 1 });
        assert_eq!(counters.for_type(VehicleType::Motorcycle), Counters::default());
        assert_eq!(counters.for_type(VehicleType::Van), Counters { total: 1, available: 1 });
    }
}
