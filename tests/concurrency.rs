//! Concurrent allocation against one lot

use parkd::error::{Error, Result};
use parkd::model::{Counters, LotCounters};
use parkd::{
    AvailabilityCache, Capacities, LotId, MemoryAvailabilityCache, MemorySpaceStore, ParkingEngine,
    SpaceStore, VehicleType,
};
use std::collections::HashSet;
use std::sync::Arc;

fn engine() -> Arc<ParkingEngine> {
    Arc::new(ParkingEngine::new(
        Arc::new(MemorySpaceStore::new()),
        Arc::new(MemoryAvailabilityCache::new()),
    ))
}

async fn assert_consistent(engine: &ParkingEngine, lot: LotId) -> LotCounters {
    let spaces = engine.store().list_spaces(lot).await.unwrap();
    let actual = LotCounters::tally(&spaces);
    assert_eq!(engine.cache().load_lot(lot).await.unwrap(), Some(actual));
    actual
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_parks_get_distinct_spaces() -> Result<()> {
    let engine = engine();
    let lot = engine
        .create_lot(None, &Capacities::default().with(VehicleType::Car, 20))
        .await?
        .id;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.park(lot, VehicleType::Car).await
        }));
    }

    let mut assigned = HashSet::new();
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(number) => assert!(assigned.insert(number), "space {} given twice", number),
            Err(Error::NoAvailableSpace { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(assigned.len(), 20);
    assert_eq!(rejected, 30);
    assert_eq!(assigned, (1..=20).collect::<HashSet<u32>>());

    let counters = assert_consistent(&engine, lot).await;
    assert_eq!(counters.lot, Counters { total: 20, available: 0 });
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_vans_and_cars_never_overlap() -> Result<()> {
    let engine = engine();
    let lot = engine
        .create_lot(None, &Capacities::default().with(VehicleType::Car, 30))
        .await?
        .id;

    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = engine.clone();
        let vehicle_type = if i % 2 == 0 {
            VehicleType::Van
        } else {
            VehicleType::Car
        };
        handles.push(tokio::spawn(async move {
            (vehicle_type, engine.park(lot, vehicle_type).await)
        }));
    }

    let mut occupied_by_results = 0u64;
    for handle in handles {
        let (vehicle_type, result) = handle.await.unwrap();
        match result {
            Ok(_) if vehicle_type == VehicleType::Van => occupied_by_results += 3,
            Ok(_) => occupied_by_results += 1,
            Err(Error::NoAvailableSpace { .. }) | Err(Error::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let counters = assert_consistent(&engine, lot).await;
    assert_eq!(counters.lot.total - counters.lot.available, occupied_by_results);

    // Every van occupies exactly three consecutive car spaces
    let vans: Vec<u32> = engine
        .store()
        .list_spaces(lot)
        .await?
        .into_iter()
        .filter(|s| s.occupant == Some(VehicleType::Van))
        .map(|s| s.number)
        .collect();
    assert_eq!(vans.len() % 3, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn park_unpark_churn_returns_to_empty() -> Result<()> {
    let engine = engine();
    let capacities = Capacities::default()
        .with(VehicleType::Car, 12)
        .with(VehicleType::Motorcycle, 4)
        .with(VehicleType::Van, 2);
    let lot = engine.create_lot(Some("churn".into()), &capacities).await?.id;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..25 {
                let vehicle_type = VehicleType::ALL[(worker + round) % 3];
                match engine.park(lot, vehicle_type).await {
                    Ok(number) => engine.unpark(lot, number).await.map(|_| ())?,
                    Err(Error::NoAvailableSpace { .. }) | Err(Error::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok::<(), Error>(())
        }));
    }

    for handle in handles {
        handle.await.unwrap()?;
    }

    let counters = assert_consistent(&engine, lot).await;
    assert_eq!(counters.lot, Counters { total: 18, available: 18 });
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_during_traffic_settles_consistent() -> Result<()> {
    let engine = engine();
    let lot = engine
        .create_lot(None, &Capacities::default().with(VehicleType::Car, 40))
        .await?
        .id;

    let parker = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..30 {
                engine.park(lot, VehicleType::Car).await?;
            }
            Ok::<(), Error>(())
        })
    };
    let syncer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                engine.sync_cache(lot).await?;
                tokio::task::yield_now().await;
            }
            Ok::<(), Error>(())
        })
    };

    parker.await.unwrap()?;
    syncer.await.unwrap()?;

    let counters = assert_consistent(&engine, lot).await;
    assert_eq!(counters.lot.available, 10);
    Ok(())
}
