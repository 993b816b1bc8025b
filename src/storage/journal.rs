//! Durable space store backed by an append-only journal
//!
//! Every committed mutation is one journal batch, so a multi-row write (the
//! three spaces of a van group, or a whole lot layout) reaches disk as a
//! single unit.
//!
//! # Format
//!
//! ```text
//! [4-byte length][json JournalBatch][4-byte xxh32 checksum]
//! [4-byte length][json JournalBatch][4-byte xxh32 checksum]
//! ...
//! ```
//!
//! Recovery replays batches in order and stops at the first torn or corrupt
//! batch; the file is truncated back to the last good batch so later appends
//! stay readable. A failed append is cut off the same way before the store
//! accepts another write.
//!
//! One process owns a data directory at a time: `open` holds an exclusive
//! lock on `parkd.lock` for the life of the store.

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh32::xxh32;

use crate::error::{Error, Result};
use crate::model::{Lot, LotId, Space, VehicleType};
use crate::storage::index::{Mutation, SpaceIndex};
use crate::storage::store::{SpaceFilter, SpaceStore};

const CHECKSUM_SEED: u32 = 0x7061_726b;
const JOURNAL_FILE: &str = "spaces.journal";
const LOCK_FILE: &str = "parkd.lock";

/// Append target of the journal
trait JournalFile: Write + Send + Sync {
    fn sync(&mut self) -> std::io::Result<()>;

    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl JournalFile for File {
    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// One journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalBatch {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub mutation: Mutation,
}

impl JournalBatch {
    pub fn new(sequence: u64, mutation: Mutation) -> Self {
        Self {
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            mutation,
        }
    }

    /// Encode with length prefix and checksum trailer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::Storage(format!("Failed to encode journal batch: {}", e)))?;

        let mut out = Vec::with_capacity(json.len() + 8);
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&xxh32(&json, CHECKSUM_SEED).to_le_bytes());
        Ok(out)
    }

    /// Decode one framed batch
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::Storage("Journal batch too short".to_string()));
        }

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < len + 8 {
            return Err(Error::Storage(format!(
                "Incomplete journal batch: expected {} bytes, got {}",
                len + 8,
                bytes.len()
            )));
        }

        let json = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        if stored != xxh32(json, CHECKSUM_SEED) {
            return Err(Error::Storage("Journal checksum mismatch".to_string()));
        }

        serde_json::from_slice(json)
            .map_err(|e| Error::Storage(format!("Failed to decode journal batch: {}", e)))
    }
}

struct Inner {
    index: SpaceIndex,
    file: Box<dyn JournalFile>,
    /// Bytes of complete batches on disk
    len: u64,
    next_sequence: u64,
    /// Set when a failed append could not be cut off
    failed: bool,
}

/// Journal-backed space store
pub struct JournalSpaceStore {
    path: PathBuf,
    fsync: bool,
    inner: RwLock<Inner>,
    // Released when the store is dropped
    _lock: File,
}

impl std::fmt::Debug for JournalSpaceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalSpaceStore")
            .field("path", &self.path)
            .field("fsync", &self.fsync)
            .finish()
    }
}

impl JournalSpaceStore {
    /// Open (or create) the journal in `dir`, replaying existing batches
    pub fn open<P: AsRef<Path>>(dir: P, fsync: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create data dir: {}", e)))?;
        let lock = Self::lock_dir(dir)?;
        let path = dir.join(JOURNAL_FILE);

        let (index, next_sequence, good_len) = Self::recover(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open journal: {}", e)))?;
        let on_disk = file
            .metadata()
            .map_err(|e| Error::Storage(format!("Failed to stat journal: {}", e)))?
            .len();
        if on_disk > good_len {
            warn!(
                path = ?path,
                discarded = on_disk - good_len,
                "Truncating torn journal tail"
            );
            file.set_len(good_len)
                .map_err(|e| Error::Storage(format!("Failed to truncate journal: {}", e)))?;
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open journal: {}", e)))?;

        Ok(Self {
            path,
            fsync,
            inner: RwLock::new(Inner {
                index,
                file: Box::new(file),
                len: good_len,
                next_sequence,
                failed: false,
            }),
            _lock: lock,
        })
    }

    fn lock_dir(dir: &Path) -> Result<File> {
        let path = dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open lock file: {}", e)))?;
        FileExt::try_lock_exclusive(&lock).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                warn!(dir = ?dir, "Data directory is locked by another process");
                Error::Storage(format!("journal in use: {}", dir.display()))
            } else {
                Error::Storage(format!("Failed to lock data dir: {}", e))
            }
        })?;
        Ok(lock)
    }

    /// Replay the journal. Returns the rebuilt index, the next sequence
    /// number and the byte length of the valid prefix.
    fn recover(path: &Path) -> Result<(SpaceIndex, u64, u64)> {
        let mut index = SpaceIndex::new();
        if !path.exists() {
            info!(path = ?path, "No journal found, starting fresh");
            return Ok((index, 1, 0));
        }

        info!(path = ?path, "Recovering spaces from journal");
        let file = File::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open journal: {}", e)))?;
        let mut reader = BufReader::new(file);

        let mut max_sequence = 0u64;
        let mut good_len = 0u64;
        let mut batches = 0usize;

        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!("Error reading journal batch length: {}", e);
                    break;
                }
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut frame = vec![0u8; len + 8];
            frame[0..4].copy_from_slice(&len_bytes);
            if let Err(e) = reader.read_exact(&mut frame[4..]) {
                warn!("Journal ends with a partial batch: {}", e);
                break;
            }

            let batch = match JournalBatch::from_bytes(&frame) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Stopping journal replay: {}", e);
                    break;
                }
            };

            if let Err(e) = index.commit(batch.mutation) {
                warn!(sequence = batch.sequence, error = %e, "Skipping unreplayable batch");
            }
            max_sequence = max_sequence.max(batch.sequence);
            good_len += frame.len() as u64;
            batches += 1;
        }

        info!(
            batches,
            lots = index.lots().len(),
            next_sequence = max_sequence + 1,
            "Journal recovery complete"
        );
        Ok((index, max_sequence + 1, good_len))
    }

    fn append(&self, inner: &mut Inner, mutation: &Mutation) -> Result<()> {
        let batch = JournalBatch::new(inner.next_sequence, mutation.clone());
        let bytes = batch.to_bytes()?;

        let written = inner
            .file
            .write_all(&bytes)
            .map_err(|e| format!("Failed to write journal batch: {}", e));
        let written = match written {
            Ok(()) if self.fsync => inner
                .file
                .sync()
                .map_err(|e| format!("Failed to sync journal: {}", e)),
            other => other,
        };

        if let Err(message) = written {
            // Drop whatever part of the batch reached the file
            if let Err(e) = inner.file.truncate(inner.len) {
                inner.failed = true;
                warn!(path = ?self.path, error = %e, "Could not cut off failed journal batch, refusing writes");
            }
            return Err(Error::Storage(message));
        }

        inner.len += bytes.len() as u64;
        inner.next_sequence += 1;
        debug!(sequence = batch.sequence, bytes = bytes.len(), "Appended journal batch");
        Ok(())
    }

    /// Validate, persist, then apply a mutation under the write lock.
    fn write<F>(&self, plan: F) -> Result<Lot>
    where
        F: FnOnce(&SpaceIndex) -> Result<Mutation>,
    {
        let mut inner = self.inner.write();
        if inner.failed {
            return Err(Error::Storage(format!(
                "journal {} has a partial batch, reopen the store",
                self.path.display()
            )));
        }
        let mutation = plan(&inner.index)?;
        self.append(&mut inner, &mutation)?;
        inner.index.commit(mutation)
    }

    /// Rewrite the journal as one snapshot batch per lot.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();
        info!(path = ?self.path, "Compacting journal");

        let temp_path = self.path.with_extension("journal.tmp");
        let mut temp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp journal: {}", e)))?;

        let mut sequence = 1u64;
        let mut len = 0u64;
        for lot in inner.index.lots() {
            let spaces = inner.index.list(lot.id)?;
            let bytes = JournalBatch::new(sequence, Mutation::LotCreated { lot, spaces }).to_bytes()?;
            temp.write_all(&bytes)
                .map_err(|e| Error::Storage(format!("Failed to write compacted journal: {}", e)))?;
            len += bytes.len() as u64;
            sequence += 1;
        }
        temp.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync compacted journal: {}", e)))?;

        std::fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::Storage(format!("Failed to replace journal: {}", e)))?;
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to reopen journal: {}", e)))?;
        inner.file = Box::new(file);
        inner.len = len;
        inner.next_sequence = sequence;
        inner.failed = false;

        info!(batches = sequence - 1, "Journal compaction complete");
        Ok(())
    }

    /// Journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SpaceStore for JournalSpaceStore {
    async fn create_lot(&self, name: Option<String>, spaces: Vec<Space>) -> Result<Lot> {
        self.write(|index| index.plan_create_lot(name, spaces))
    }

    async fn provision_lot(&self, id: LotId, spaces: Vec<Space>) -> Result<Lot> {
        self.write(|index| index.plan_provision(id, spaces))
    }

    async fn find_lot(&self, id: LotId) -> Result<Option<Lot>> {
        Ok(self.inner.read().index.lot(id))
    }

    async fn list_lots(&self) -> Result<Vec<Lot>> {
        Ok(self.inner.read().index.lots())
    }

    async fn replace_spaces(&self, lot: LotId, spaces: Vec<Space>) -> Result<()> {
        self.write(|index| index.plan_replace(lot, spaces))?;
        Ok(())
    }

    async fn delete_all(&self, lot: LotId) -> Result<u64> {
        let mut removed = 0;
        self.write(|index| {
            removed = index.space_count(lot)?;
            index.plan_delete_all(lot)
        })?;
        Ok(removed)
    }

    async fn create_many(&self, lot: LotId, spaces: Vec<Space>) -> Result<()> {
        self.write(|index| index.plan_create_many(lot, spaces))?;
        Ok(())
    }

    async fn find_by_number(&self, lot: LotId, number: u32) -> Result<Option<Space>> {
        self.inner.read().index.get(lot, number)
    }

    async fn find_by_type(
        &self,
        lot: LotId,
        designated: VehicleType,
        occupied: bool,
    ) -> Result<Vec<Space>> {
        self.inner.read().index.by_type(lot, designated, occupied)
    }

    async fn count(&self, lot: LotId, filter: SpaceFilter) -> Result<u64> {
        self.inner.read().index.count(lot, filter)
    }

    async fn list_spaces(&self, lot: LotId) -> Result<Vec<Space>> {
        self.inner.read().index.list(lot)
    }

    async fn apply(&self, lot: LotId, rows: &[Space]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.write(|index| index.plan_update(lot, rows))?;
        Ok(())
    }
}
