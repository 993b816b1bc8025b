//! Space storage layer
//!
//! # Architecture
//!
//! ```text
//! Lots (LotId → Lot)
//!   └─→ Spaces (space number → designated type, occupant)
//! ```
//!
//! ## Space Store
//!
//! The `SpaceStore` trait is the authoritative record of every space:
//! - Lot creation and (re)provisioning as one unit
//! - Lookups by space number, by designated type and occupancy, and counts
//! - Atomic multi-row updates
//!
//! ## Implementation
//!
//! - **Memory** (`MemorySpaceStore`) for tests and ephemeral deployments
//! - **Journal** (`JournalSpaceStore`) append-only, checksummed batch log
//!
//! Both share the `SpaceIndex`. Row-level locking lives in `RowLocks` and is
//! taken by the allocation engine, not by the stores.

pub mod index;
pub mod journal;
pub mod locks;
pub mod memory;
pub mod store;

pub use index::{Mutation, SpaceIndex};
pub use journal::{JournalBatch, JournalSpaceStore};
pub use locks::{LotGuard, RowGuard, RowLocks};
pub use memory::MemorySpaceStore;
pub use store::{SpaceFilter, SpaceStore};
