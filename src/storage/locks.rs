//! Row and lot locks for space mutations
//!
//! Row locks are keyed by (lot, space number). Multi-row acquisitions are
//! always taken in ascending space number order, so two callers locking
//! overlapping runs cannot deadlock. Every row lock is taken under a shared
//! lot lock; provisioning a lot takes the lot lock exclusively and therefore
//! waits for in-flight row work to finish.
//!
//! Acquisition is bounded by a timeout. Running out of time is reported as
//! `Conflict`, which callers may retry.
//!
//! Table entries only live while some caller holds or waits for them. A
//! guard removes its entries on drop once nobody else references them.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{Error, Result};
use crate::model::LotId;

/// Default lock acquisition timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

type RowTable = DashMap<(LotId, u32), Arc<Mutex<()>>>;
type LotTable = DashMap<LotId, Arc<RwLock<()>>>;

/// Lock table for space rows and lots
pub struct RowLocks {
    rows: Arc<RowTable>,
    lots: Arc<LotTable>,
    timeout: Duration,
}

/// Locks held on a set of rows of one lot. Released on drop.
pub struct RowGuard {
    lot: LotId,
    numbers: Vec<u32>,
    rows: Vec<OwnedMutexGuard<()>>,
    lot_guard: Option<OwnedRwLockReadGuard<()>>,
    row_table: Arc<RowTable>,
    lot_table: Arc<LotTable>,
}

/// Exclusive lock on a whole lot.
pub struct LotGuard {
    lot: LotId,
    guard: Option<OwnedRwLockWriteGuard<()>>,
    lot_table: Arc<LotTable>,
}

/// Remove `key` when the table holds the last reference to its lock.
///
/// Runs under the shard lock, so no caller can clone the entry meanwhile.
fn prune<K: Eq + Hash, T>(table: &DashMap<K, Arc<T>>, key: &K) {
    table.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

impl RowGuard {
    pub fn lot(&self) -> LotId {
        self.lot
    }

    /// Space numbers held, ascending
    pub fn numbers(&self) -> &[u32] {
        &self.numbers
    }

    pub fn covers(&self, number: u32) -> bool {
        self.numbers.binary_search(&number).is_ok()
    }
}

impl Drop for RowGuard {
    fn drop(&mut self) {
        // Rows go before the lot lock
        self.rows.clear();
        for &number in &self.numbers {
            prune(&self.row_table, &(self.lot, number));
        }
        self.lot_guard.take();
        prune(&self.lot_table, &self.lot);
    }
}

impl LotGuard {
    pub fn lot(&self) -> LotId {
        self.lot
    }
}

impl Drop for LotGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.lot_table, &self.lot);
    }
}

impl RowLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            lots: Arc::new(DashMap::new()),
            timeout,
        }
    }

    fn lot_lock(&self, lot: LotId) -> Arc<RwLock<()>> {
        self.lots
            .entry(lot)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn row_lock(&self, lot: LotId, number: u32) -> Arc<Mutex<()>> {
        self.rows
            .entry((lot, number))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn conflict(&self, what: String) -> Error {
        Error::Conflict(format!(
            "timed out after {}ms waiting for {}",
            self.timeout.as_millis(),
            what
        ))
    }

    /// Lock `numbers` into `guard` in ascending order.
    ///
    /// On timeout the rows acquired so far stay in the guard; dropping it
    /// releases and prunes them.
    async fn acquire_rows(&self, guard: &mut RowGuard, numbers: BTreeSet<u32>) -> Result<()> {
        for number in numbers {
            let lock = self.row_lock(guard.lot, number);
            match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
                Ok(row) => {
                    guard.rows.push(row);
                    guard.numbers.push(number);
                }
                Err(_) => {
                    prune(&self.rows, &(guard.lot, number));
                    return Err(self.conflict(format!("space {} in lot {}", number, guard.lot)));
                }
            }
        }
        Ok(())
    }

    /// Lock the given rows of `lot` in ascending order.
    pub async fn lock_rows(&self, lot: LotId, numbers: &[u32]) -> Result<RowGuard> {
        let lot_lock = self.lot_lock(lot);
        let lot_guard = match tokio::time::timeout(self.timeout, lot_lock.read_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                prune(&self.lots, &lot);
                return Err(self.conflict(format!("lot {}", lot)));
            }
        };

        let mut guard = RowGuard {
            lot,
            numbers: Vec::with_capacity(numbers.len()),
            rows: Vec::with_capacity(numbers.len()),
            lot_guard: Some(lot_guard),
            row_table: self.rows.clone(),
            lot_table: self.lots.clone(),
        };
        self.acquire_rows(&mut guard, numbers.iter().copied().collect())
            .await?;
        Ok(guard)
    }

    /// Add rows to an existing guard.
    ///
    /// Only rows numbered above every row already held may be added, which
    /// keeps the ascending acquisition order.
    pub async fn extend(&self, guard: &mut RowGuard, numbers: &[u32]) -> Result<()> {
        let highest = guard.numbers.last().copied().unwrap_or(0);
        let fresh: BTreeSet<u32> = numbers
            .iter()
            .copied()
            .filter(|n| !guard.covers(*n))
            .collect();
        if let Some(&low) = fresh.iter().next() {
            if low < highest {
                return Err(Error::InvalidArgument(format!(
                    "cannot lock space {} while holding space {}",
                    low, highest
                )));
            }
        }

        self.acquire_rows(guard, fresh).await
    }

    /// Lock a whole lot exclusively.
    pub async fn lock_lot(&self, lot: LotId) -> Result<LotGuard> {
        let lot_lock = self.lot_lock(lot);
        match tokio::time::timeout(self.timeout, lot_lock.write_owned()).await {
            Ok(guard) => Ok(LotGuard {
                lot,
                guard: Some(guard),
                lot_table: self.lots.clone(),
            }),
            Err(_) => {
                prune(&self.lots, &lot);
                Err(self.conflict(format!("lot {}", lot)))
            }
        }
    }

    /// Whether no lot or row entry is tracked.
    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.rows.is_empty() && self.lots.is_empty()
    }
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }
}
