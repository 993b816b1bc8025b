//! End-to-end allocation scenarios against the in-memory store and cache

use parkd::error::{Error, Result};
use parkd::model::{Counters, LotCounters};
use parkd::{
    AvailabilityCache, Capacities, LotId, MemoryAvailabilityCache, MemorySpaceStore, ParkingEngine,
    Space, SpaceStore, VehicleType,
};
use std::sync::Arc;

fn engine() -> ParkingEngine {
    ParkingEngine::new(
        Arc::new(MemorySpaceStore::new()),
        Arc::new(MemoryAvailabilityCache::new()),
    )
}

fn caps(car: u32, motorcycle: u32, van: u32) -> Capacities {
    Capacities::default()
        .with(VehicleType::Car, car)
        .with(VehicleType::Motorcycle, motorcycle)
        .with(VehicleType::Van, van)
}

async fn counters(engine: &ParkingEngine, lot: LotId) -> LotCounters {
    engine
        .cache()
        .load_lot(lot)
        .await
        .unwrap()
        .expect("lot is cached")
}

/// Cached counters must equal a fresh count of the store.
async fn assert_consistent(engine: &ParkingEngine, lot: LotId) {
    let spaces = engine.store().list_spaces(lot).await.unwrap();
    let actual = LotCounters::tally(&spaces);
    assert_eq!(counters(engine, lot).await, actual);

    let by_types: u64 = VehicleType::ALL
        .iter()
        .map(|t| actual.for_type(*t).available)
        .sum();
    assert_eq!(actual.lot.available, by_types);

    for space in spaces {
        assert_eq!(space.is_occupied(), space.occupant.is_some());
    }
}

async fn space(engine: &ParkingEngine, lot: LotId, number: u32) -> Space {
    engine
        .store()
        .find_by_number(lot, number)
        .await
        .unwrap()
        .expect("space exists")
}

#[tokio::test]
async fn scenario_a_cars_fill_in_order() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(Some("A".into()), &caps(5, 0, 0)).await?.id;

    for expected in 1..=5 {
        assert_eq!(engine.park(lot, VehicleType::Car).await?, expected);
    }
    assert_eq!(
        engine.park(lot, VehicleType::Car).await,
        Err(Error::NoAvailableSpace {
            lot,
            vehicle_type: VehicleType::Car
        })
    );
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn scenario_b_van_takes_three_car_spaces() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(3, 0, 0)).await?.id;

    assert_eq!(engine.park(lot, VehicleType::Van).await?, 1);
    for n in 1..=3 {
        let s = space(&engine, lot, n).await;
        assert!(s.is_occupied());
        assert_eq!(s.occupant, Some(VehicleType::Van));
        assert_eq!(s.designated, VehicleType::Car);
    }
    assert_eq!(counters(&engine, lot).await.for_type(VehicleType::Car).available, 0);
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn scenario_c_unpark_van_frees_the_group() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(3, 0, 0)).await?.id;
    engine.park(lot, VehicleType::Van).await?;

    assert_eq!(engine.unpark(lot, 1).await?, vec![1, 2, 3]);
    for n in 1..=3 {
        assert!(!space(&engine, lot, n).await.is_occupied());
    }
    assert_eq!(
        counters(&engine, lot).await.for_type(VehicleType::Car),
        Counters { total: 3, available: 3 }
    );
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn scenario_d_van_prefers_its_own_space() -> Result<()> {
    let engine = engine();
    // Cars are numbered 1..=3, the van space is 4
    let lot = engine.create_lot(None, &caps(3, 0, 1)).await?.id;

    assert_eq!(engine.park(lot, VehicleType::Van).await?, 4);
    let after = counters(&engine, lot).await;
    assert_eq!(after.for_type(VehicleType::Car).available, 3);
    assert_eq!(after.for_type(VehicleType::Van).available, 0);
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn scenario_e_motorcycle_overflow_credits_car() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(1, 0, 0)).await?.id;

    let number = engine.park(lot, VehicleType::Motorcycle).await?;
    let s = space(&engine, lot, number).await;
    assert_eq!(s.occupant, Some(VehicleType::Motorcycle));
    assert_eq!(s.designated, VehicleType::Car);
    assert_eq!(counters(&engine, lot).await.for_type(VehicleType::Car).available, 0);

    engine.unpark(lot, number).await?;
    let after = counters(&engine, lot).await;
    assert_eq!(after.for_type(VehicleType::Car).available, 1);
    assert_eq!(after.for_type(VehicleType::Motorcycle), Counters::default());
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn boundary_gap_breaks_van_run() -> Result<()> {
    let engine = engine();
    let lot = LotId::new(11);
    engine.initialize_lot(lot, &caps(5, 0, 0)).await?;

    // Occupy space 3 so the free car spaces are 1, 2, 4, 5
    let third = space(&engine, lot, 3).await;
    engine
        .store()
        .apply(lot, &[third.occupied_by(VehicleType::Car)])
        .await?;
    engine.sync_cache(lot).await?;

    assert_eq!(
        engine.park(lot, VehicleType::Van).await,
        Err(Error::NoAvailableSpace {
            lot,
            vehicle_type: VehicleType::Van
        })
    );
    assert_eq!(counters(&engine, lot).await.for_type(VehicleType::Car).available, 4);
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn boundary_van_skips_broken_run() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(6, 0, 0)).await?.id;
    engine.park(lot, VehicleType::Car).await?;
    engine.park(lot, VehicleType::Car).await?;
    engine.unpark(lot, 1).await?;

    // Free: 1, 3, 4, 5, 6
    assert_eq!(engine.park(lot, VehicleType::Van).await?, 3);
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn round_trip_restores_counters() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(4, 2, 2)).await?.id;

    for vehicle_type in VehicleType::ALL {
        let before = counters(&engine, lot).await;
        let number = engine.park(lot, vehicle_type).await?;
        engine.unpark(lot, number).await?;
        assert_eq!(counters(&engine, lot).await, before, "{}", vehicle_type);
    }
    Ok(())
}

#[tokio::test]
async fn sync_twice_is_idempotent() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(2, 2, 2)).await?.id;
    engine.park(lot, VehicleType::Motorcycle).await?;

    let first = engine.sync_cache(lot).await?;
    let second = engine.sync_cache(lot).await?;
    assert_eq!(first, second);
    assert!(engine.verify_cache(lot).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn double_unpark_is_rejected() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(1, 0, 0)).await?.id;
    let number = engine.park(lot, VehicleType::Car).await?;

    engine.unpark(lot, number).await?;
    assert_eq!(
        engine.unpark(lot, number).await,
        Err(Error::SpaceNotFound { lot, space: number })
    );
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn unpark_inside_van_group_frees_to_the_end() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(None, &caps(3, 0, 0)).await?.id;
    engine.park(lot, VehicleType::Van).await?;

    // Starting mid-group frees the contiguous van spaces from there on
    assert_eq!(engine.unpark(lot, 2).await?, vec![2, 3]);
    assert!(space(&engine, lot, 1).await.is_occupied());
    assert_consistent(&engine, lot).await;
    Ok(())
}

#[tokio::test]
async fn mixed_traffic_keeps_cache_consistent() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(Some("mixed".into()), &caps(10, 3, 2)).await?.id;

    let mut parked = Vec::new();
    for vehicle_type in [
        VehicleType::Van,
        VehicleType::Motorcycle,
        VehicleType::Van,
        VehicleType::Van,
        VehicleType::Motorcycle,
        VehicleType::Car,
        VehicleType::Motorcycle,
        VehicleType::Motorcycle,
        VehicleType::Van,
    ] {
        if let Ok(number) = engine.park(lot, vehicle_type).await {
            parked.push(number);
        }
        assert_consistent(&engine, lot).await;
    }

    for number in parked.into_iter().rev() {
        engine.unpark(lot, number).await?;
        assert_consistent(&engine, lot).await;
    }

    let status = engine.status(lot).await?;
    assert_eq!(status.capacity, Counters { total: 15, available: 15 });
    Ok(())
}

#[tokio::test]
async fn reinitialize_replaces_spaces() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(Some("grow".into()), &caps(2, 0, 0)).await?.id;
    engine.park(lot, VehicleType::Car).await?;

    let record = engine.reinitialize_lot(lot, &caps(1, 1, 1)).await?;
    assert_eq!(record.name.as_deref(), Some("grow"));

    let status = engine.status(lot).await?;
    assert_eq!(status.capacity, Counters { total: 3, available: 3 });
    assert_eq!(
        status.capacity_by_type[&VehicleType::Motorcycle],
        Counters { total: 1, available: 1 }
    );
    assert!(status.spaces.iter().all(|s| !s.occupied));
    Ok(())
}

#[tokio::test]
async fn status_lists_every_type() -> Result<()> {
    let engine = engine();
    let lot = engine.create_lot(Some("empty".into()), &caps(0, 0, 0)).await?.id;

    let status = engine.status(lot).await?;
    assert_eq!(status.capacity_by_type.len(), 3);
    assert!(status.spaces.is_empty());
    assert_eq!(
        engine.park(lot, VehicleType::Motorcycle).await,
        Err(Error::NoAvailableSpace {
            lot,
            vehicle_type: VehicleType::Motorcycle
        })
    );
    Ok(())
}
