//! Allocation engine
//!
//! Decides which space(s) satisfy a park request, releases them on unpark,
//! and keeps the availability cache in step with every space mutation.
//!
//! # Placement order
//!
//! ```text
//! park(vehicle)
//!   ├─→ exact type        lowest free space designated for the vehicle
//!   ├─→ van overflow      earliest run of 3 consecutive free car spaces
//!   ├─→ motorcycle        one car space, then one van space
//!   └─→ NoAvailableSpace
//! ```
//!
//! Each attempt reads the cached counter first, so a full type is rejected
//! without touching the store. Candidates come from the store and are
//! re-checked once their rows are locked; a candidate taken in the meantime
//! is skipped.

pub mod placement;
pub mod unit_of_work;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::cache::{AvailabilityCache, CacheDrift, CacheSynchronizer};
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{Capacities, Counters, Lot, LotCounters, LotId, Space, VehicleType};
use crate::storage::locks::DEFAULT_LOCK_TIMEOUT_MS;
use crate::storage::{RowLocks, SpaceStore};

pub use placement::{find_consecutive_run, Placement, VAN_RUN_LENGTH};
pub use unit_of_work::UnitOfWork;

/// Default number of van overflow scans before giving up with `Conflict`
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default upper bound on the spaces of one lot
pub const DEFAULT_MAX_SPACES_PER_LOT: u64 = 100_000;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Row and lot lock acquisition timeout
    pub lock_timeout: Duration,
    /// Van overflow rescans when the chosen run is taken concurrently
    pub max_attempts: u32,
    /// Largest lot that may be provisioned
    pub max_spaces_per_lot: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_spaces_per_lot: DEFAULT_MAX_SPACES_PER_LOT,
        }
    }
}

/// One row of the status listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceStatus {
    pub space_number: u32,
    pub designated: VehicleType,
    pub occupied: bool,
    pub occupant: Option<VehicleType>,
}

/// Read-only view of a lot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub lot: LotId,
    pub name: Option<String>,
    pub capacity: Counters,
    pub capacity_by_type: BTreeMap<VehicleType, Counters>,
    pub spaces: Vec<SpaceStatus>,
}

/// Allocation engine over a space store and an availability cache.
pub struct ParkingEngine {
    store: Arc<dyn SpaceStore>,
    cache: Arc<dyn AvailabilityCache>,
    locks: Arc<RowLocks>,
    synchronizer: CacheSynchronizer,
    max_attempts: u32,
    max_spaces_per_lot: u64,
}

impl ParkingEngine {
    pub fn new(store: Arc<dyn SpaceStore>, cache: Arc<dyn AvailabilityCache>) -> Self {
        Self::with_options(store, cache, EngineOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn SpaceStore>,
        cache: Arc<dyn AvailabilityCache>,
        options: EngineOptions,
    ) -> Self {
        let locks = Arc::new(RowLocks::new(options.lock_timeout));
        let synchronizer = CacheSynchronizer::new(store.clone(), cache.clone(), locks.clone());
        Self {
            store,
            cache,
            locks,
            synchronizer,
            max_attempts: options.max_attempts.max(1),
            max_spaces_per_lot: options.max_spaces_per_lot,
        }
    }

    pub fn store(&self) -> &Arc<dyn SpaceStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn AvailabilityCache> {
        &self.cache
    }

    pub fn synchronizer(&self) -> &CacheSynchronizer {
        &self.synchronizer
    }

    // ===== Provisioning =====

    fn layout(&self, capacities: &Capacities) -> Result<Vec<Space>> {
        if capacities.total() > self.max_spaces_per_lot {
            return Err(Error::InvalidArgument(format!(
                "{} spaces exceed the limit of {} per lot",
                capacities.total(),
                self.max_spaces_per_lot
            )));
        }
        capacities.layout()
    }

    /// Create lot `lot` if needed and lay out fresh spaces for it.
    ///
    /// Existing spaces are discarded and numbering restarts at 1. Row traffic
    /// for the lot waits until the new counters are in the cache.
    #[instrument(skip(self, capacities), fields(total = capacities.total()))]
    pub async fn initialize_lot(&self, lot: LotId, capacities: &Capacities) -> Result<Lot> {
        let spaces = self.layout(capacities)?;
        let guard = self.locks.lock_lot(lot).await?;
        let record = self.store.provision_lot(lot, spaces).await?;
        self.synchronizer.sync_locked(&guard).await?;
        info!(lot = %lot, "Parking lot initialized");
        Ok(record)
    }

    /// Create a lot under a new id with the given capacities.
    #[instrument(skip(self, capacities), fields(total = capacities.total()))]
    pub async fn create_lot(&self, name: Option<String>, capacities: &Capacities) -> Result<Lot> {
        let spaces = self.layout(capacities)?;
        let record = self.store.create_lot(name, spaces).await?;
        let guard = self.locks.lock_lot(record.id).await?;
        self.synchronizer.sync_locked(&guard).await?;
        info!(lot = %record.id, name = ?record.name, "Parking lot created");
        Ok(record)
    }

    /// Replace every space of an existing lot.
    #[instrument(skip(self, capacities), fields(total = capacities.total()))]
    pub async fn reinitialize_lot(&self, lot: LotId, capacities: &Capacities) -> Result<Lot> {
        let spaces = self.layout(capacities)?;
        let guard = self.locks.lock_lot(lot).await?;
        let record = self
            .store
            .find_lot(lot)
            .await?
            .ok_or(Error::LotNotFound(lot))?;
        self.store.replace_spaces(lot, spaces).await?;
        self.synchronizer.sync_locked(&guard).await?;
        info!(lot = %lot, "Parking lot reinitialized");
        Ok(record)
    }

    // ===== Allocation =====

    /// Counters for `lot`, syncing the lot first if it is not cached.
    async fn counters(&self, lot: LotId) -> Result<LotCounters> {
        match self.cache.load_lot(lot).await? {
            Some(counters) => Ok(counters),
            None => {
                debug!(lot = %lot, "Lot not cached, reading through to the store");
                self.synchronizer.sync(lot).await
            }
        }
    }

    /// Park a vehicle and return the number of the space it was given.
    ///
    /// A van parked in car spaces is identified by the first space of its run.
    #[instrument(skip(self))]
    pub async fn park(&self, lot: LotId, vehicle_type: VehicleType) -> Result<u32> {
        let _timer = metrics::OPERATION_DURATION
            .with_label_values(&["park"])
            .start_timer();

        let result = self.place(lot, vehicle_type).await;
        match &result {
            Ok((space, placement)) => {
                metrics::PARK_TOTAL
                    .with_label_values(&[vehicle_type.as_str(), placement.as_str(), "ok"])
                    .inc();
                info!(lot = %lot, space, placement = placement.as_str(), "Vehicle parked");
            }
            Err(e) => {
                metrics::PARK_TOTAL
                    .with_label_values(&[vehicle_type.as_str(), "none", "error"])
                    .inc();
                debug!(lot = %lot, error = %e, "Park rejected");
            }
        }
        result.map(|(space, _)| space)
    }

    async fn place(&self, lot: LotId, vehicle_type: VehicleType) -> Result<(u32, Placement)> {
        let counters = self.counters(lot).await?;

        if counters.for_type(vehicle_type).available > 0 {
            if let Some(space) = self.occupy_single(lot, vehicle_type, vehicle_type).await? {
                return Ok((space, Placement::Exact));
            }
        }

        match vehicle_type {
            VehicleType::Van => {
                if counters.for_type(VehicleType::Car).available >= VAN_RUN_LENGTH as u64 {
                    if let Some(space) = self.occupy_run(lot).await? {
                        return Ok((space, Placement::VanOverflow));
                    }
                }
            }
            VehicleType::Motorcycle => {
                for designated in [VehicleType::Car, VehicleType::Van] {
                    if counters.for_type(designated).available == 0 {
                        continue;
                    }
                    if let Some(space) = self
                        .occupy_single(lot, designated, VehicleType::Motorcycle)
                        .await?
                    {
                        return Ok((space, Placement::MotorcycleOverflow));
                    }
                }
            }
            VehicleType::Car => {}
        }

        Err(Error::NoAvailableSpace { lot, vehicle_type })
    }

    /// Occupy the lowest free space designated `designated`.
    ///
    /// Returns `None` when every candidate turned out to be taken.
    async fn occupy_single(
        &self,
        lot: LotId,
        designated: VehicleType,
        occupant: VehicleType,
    ) -> Result<Option<u32>> {
        let candidates = self.store.find_by_type(lot, designated, false).await?;

        for candidate in candidates {
            let mut uow = UnitOfWork::begin(
                self.store.as_ref(),
                self.cache.as_ref(),
                &self.locks,
                lot,
                &[candidate.number],
            )
            .await?;

            match uow.load(candidate.number).await? {
                Some(space) if !space.is_occupied() => {
                    uow.stage(space.occupied_by(occupant))?;
                    uow.adjust(designated, -1);
                    uow.commit().await?;
                    return Ok(Some(space.number));
                }
                _ => debug!(lot = %lot, space = candidate.number, "Candidate taken, trying next"),
            }
        }

        Ok(None)
    }

    /// Occupy the earliest run of consecutive free car spaces with a van.
    async fn occupy_run(&self, lot: LotId) -> Result<Option<u32>> {
        for attempt in 1..=self.max_attempts {
            let free = self.store.find_by_type(lot, VehicleType::Car, false).await?;
            let pairs: Vec<(u32, bool)> = free.iter().map(|s| (s.number, s.is_occupied())).collect();

            let Some(start) = find_consecutive_run(&pairs, VAN_RUN_LENGTH) else {
                debug!(lot = %lot, free = free.len(), "No consecutive car spaces for van");
                return Ok(None);
            };

            let numbers: Vec<u32> = (0..VAN_RUN_LENGTH as u32).map(|i| start + i).collect();
            let mut uow = UnitOfWork::begin(
                self.store.as_ref(),
                self.cache.as_ref(),
                &self.locks,
                lot,
                &numbers,
            )
            .await?;

            let mut intact = true;
            for &number in &numbers {
                match uow.load(number).await? {
                    Some(space) if !space.is_occupied() && space.designated == VehicleType::Car => {
                        uow.stage(space.occupied_by(VehicleType::Van))?;
                    }
                    _ => {
                        intact = false;
                        break;
                    }
                }
            }

            if intact {
                uow.adjust(VehicleType::Car, -(VAN_RUN_LENGTH as i64));
                uow.commit().await?;
                return Ok(Some(start));
            }

            debug!(lot = %lot, start, attempt, "Car run taken concurrently, rescanning");
        }

        Err(Error::Conflict(format!(
            "van placement in lot {} lost the race for car spaces {} times",
            lot, self.max_attempts
        )))
    }

    // ===== Release =====

    /// Free the space `number`, or the van group starting there.
    ///
    /// Returns the numbers of the spaces freed.
    #[instrument(skip(self))]
    pub async fn unpark(&self, lot: LotId, number: u32) -> Result<Vec<u32>> {
        let _timer = metrics::OPERATION_DURATION
            .with_label_values(&["unpark"])
            .start_timer();

        let result = self.release(lot, number).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::UNPARK_TOTAL.with_label_values(&[status]).inc();
        if let Ok(freed) = &result {
            metrics::SPACES_RELEASED.inc_by(freed.len() as u64);
            info!(lot = %lot, space = number, freed = ?freed, "Vehicle unparked");
        }
        result
    }

    async fn release(&self, lot: LotId, number: u32) -> Result<Vec<u32>> {
        // Makes sure the lot exists and is cached before rows are locked
        self.counters(lot).await?;

        let mut uow = UnitOfWork::begin(
            self.store.as_ref(),
            self.cache.as_ref(),
            &self.locks,
            lot,
            &[number],
        )
        .await?;

        let space = match uow.load(number).await? {
            Some(space) if space.is_occupied() => space,
            _ => return Err(Error::SpaceNotFound { lot, space: number }),
        };

        if space.occupant == Some(VehicleType::Van) && space.designated == VehicleType::Car {
            let last = number.saturating_add(VAN_RUN_LENGTH as u32 - 1);
            let rest: Vec<u32> = (number.saturating_add(1)..=last).collect();
            uow.extend(&self.locks, &rest).await?;

            for n in number..=last {
                match uow.load(n).await? {
                    Some(s) if s.occupant == Some(VehicleType::Van) && s.designated == VehicleType::Car => {
                        uow.stage(s.vacated())?;
                    }
                    _ => break,
                }
            }

            let freed = uow.staged().count();
            if freed < VAN_RUN_LENGTH {
                warn!(lot = %lot, space = number, freed, "Van group shorter than expected");
            }
            uow.adjust(VehicleType::Car, freed as i64);
        } else {
            uow.stage(space.vacated())?;
            uow.adjust(space.designated, 1);
        }

        let freed: Vec<u32> = uow.staged().map(|s| s.number).collect();
        uow.commit().await?;
        Ok(freed)
    }

    // ===== Queries and cache maintenance =====

    /// Counters and space listing for `lot`. Not linked to any single
    /// allocation, so counters and rows may be read at different instants.
    #[instrument(skip(self))]
    pub async fn status(&self, lot: LotId) -> Result<Status> {
        let record = self
            .store
            .find_lot(lot)
            .await?
            .ok_or(Error::LotNotFound(lot))?;
        let counters = self.counters(lot).await?;
        let spaces = self.store.list_spaces(lot).await?;

        Ok(Status {
            lot,
            name: record.name,
            capacity: counters.lot,
            capacity_by_type: VehicleType::ALL
                .iter()
                .map(|t| (*t, counters.for_type(*t)))
                .collect(),
            spaces: spaces
                .into_iter()
                .map(|s| SpaceStatus {
                    space_number: s.number,
                    designated: s.designated,
                    occupied: s.is_occupied(),
                    occupant: s.occupant,
                })
                .collect(),
        })
    }

    /// Recompute the lot's counters from the store.
    pub async fn sync_cache(&self, lot: LotId) -> Result<LotCounters> {
        self.synchronizer.sync(lot).await
    }

    /// Compare the lot's cached counters with the store.
    pub async fn verify_cache(&self, lot: LotId) -> Result<CacheDrift> {
        self.synchronizer.verify(lot).await
    }

    /// Sync every lot in the store. Returns the number of lots synced.
    pub async fn warm_cache(&self) -> Result<usize> {
        let lots = self.synchronizer.sync_all().await?;
        info!(lots, "Availability cache warmed");
        Ok(lots)
    }

    pub async fn list_lots(&self) -> Result<Vec<Lot>> {
        self.store.list_lots().await
    }
}
