//! Engine over the journal store: state survives a restart

use parkd::config::{Settings, StorageBackend};
use parkd::error::Result;
use parkd::model::Counters;
use parkd::{
    Capacities, JournalSpaceStore, LotId, MemoryAvailabilityCache, ParkingEngine, SpaceStore,
    VehicleType,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parkd_it_{}_{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir
}

fn open(dir: &Path) -> Result<ParkingEngine> {
    let store = Arc::new(JournalSpaceStore::open(dir, false)?);
    Ok(ParkingEngine::new(store, Arc::new(MemoryAvailabilityCache::new())))
}

#[tokio::test]
async fn restart_recovers_spaces_and_warms_cache() -> Result<()> {
    let dir = temp_dir("restart");

    let (lot, van_space) = {
        let engine = open(&dir)?;
        let capacities = Capacities::default()
            .with(VehicleType::Car, 6)
            .with(VehicleType::Van, 1);
        let lot = engine.create_lot(Some("depot".into()), &capacities).await?.id;
        engine.park(lot, VehicleType::Van).await?;
        let van_space = engine.park(lot, VehicleType::Van).await?;
        engine.park(lot, VehicleType::Motorcycle).await?;
        (lot, van_space)
    };
    assert_eq!(van_space, 1);

    let engine = open(&dir)?;
    assert_eq!(engine.warm_cache().await?, 1);

    let status = engine.status(lot).await?;
    assert_eq!(status.name.as_deref(), Some("depot"));
    assert_eq!(status.capacity, Counters { total: 7, available: 2 });
    assert_eq!(
        status.capacity_by_type[&VehicleType::Car],
        Counters { total: 6, available: 2 }
    );

    // The van group recovered as one unit and can be released
    assert_eq!(engine.unpark(lot, van_space).await?, vec![1, 2, 3]);
    assert!(engine.verify_cache(lot).await?.is_consistent());

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[tokio::test]
async fn initialize_by_id_then_new_lot_gets_next_id() -> Result<()> {
    let dir = temp_dir("ids");

    {
        let engine = open(&dir)?;
        engine
            .initialize_lot(LotId::new(5), &Capacities::default().with(VehicleType::Car, 2))
            .await?;
    }

    let engine = open(&dir)?;
    let lot = engine
        .create_lot(Some("next".into()), &Capacities::default().with(VehicleType::Car, 1))
        .await?;
    assert_eq!(lot.id, LotId::new(6));
    assert_eq!(engine.list_lots().await?.len(), 2);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[tokio::test]
async fn compacted_journal_reopens_with_same_state() -> Result<()> {
    let dir = temp_dir("compact");

    let before = {
        let store = Arc::new(JournalSpaceStore::open(&dir, false)?);
        let engine = ParkingEngine::new(store.clone(), Arc::new(MemoryAvailabilityCache::new()));
        let lot = engine
            .create_lot(None, &Capacities::default().with(VehicleType::Car, 4))
            .await?
            .id;
        for _ in 0..3 {
            let n = engine.park(lot, VehicleType::Car).await?;
            engine.unpark(lot, n).await?;
        }
        engine.park(lot, VehicleType::Car).await?;
        store.compact()?;
        store.list_spaces(lot).await?
    };

    let store = JournalSpaceStore::open(&dir, false)?;
    let lots = store.list_lots().await?;
    assert_eq!(lots.len(), 1);
    assert_eq!(store.list_spaces(lots[0].id).await?, before);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[tokio::test]
async fn settings_open_configured_backend() -> Result<()> {
    let dir = temp_dir("settings");
    let mut settings = Settings::default();
    settings.storage.backend = StorageBackend::Journal;
    settings.storage.data_dir = dir.clone();
    settings.storage.fsync = false;

    {
        let engine = settings.open_engine()?;
        engine
            .initialize_lot(LotId::new(1), &Capacities::default().with(VehicleType::Motorcycle, 3))
            .await?;
        engine.park(LotId::new(1), VehicleType::Motorcycle).await?;
    }

    let engine = settings.open_engine()?;
    let status = engine.status(LotId::new(1)).await?;
    assert_eq!(status.capacity, Counters { total: 3, available: 2 });

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
