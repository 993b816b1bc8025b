// parkd - Parking space allocation engine
// Typed space allocation with an availability cache kept in lockstep with the space table

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod model;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use cache::{AvailabilityCache, CacheSynchronizer, MemoryAvailabilityCache};
pub use engine::{ParkingEngine, Status};
pub use model::{Capacities, LotId, Space, VehicleType};
pub use storage::{JournalSpaceStore, MemorySpaceStore, SpaceStore};

/// parkd error types
pub mod error {
    use crate::model::{LotId, VehicleType};
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Parking lot {0} not found")]
        LotNotFound(LotId),

        #[error("Unknown vehicle type: {0}")]
        VehicleTypeUnknown(String),

        #[error("Space {space} in lot {lot} not found or not occupied")]
        SpaceNotFound { lot: LotId, space: u32 },

        #[error("No available parking spaces for {vehicle_type} in lot {lot}")]
        NoAvailableSpace { lot: LotId, vehicle_type: VehicleType },

        #[error("Conflict: {0}")]
        Conflict(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Cache error: {0}")]
        Cache(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    impl Error {
        /// Whether a caller may retry the same request automatically.
        pub fn is_retryable(&self) -> bool {
            matches!(self, Error::Conflict(_))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
