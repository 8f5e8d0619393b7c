//! Raft log storage implementation using RocksDB
//!
//! All partitions hosted by a node share one database. Every key starts
//! with the owning partition's big-endian id, so a partition's log is a
//! contiguous key range and purge/truncate are range deletes.

use crate::types::{PartitionTypeConfig, RaftNodeId};
use extentraft_core::{ExtentRaftError, PartitionId};
use openraft::storage::{LogFlushed, LogState, RaftLogStorage};
use openraft::{
    Entry, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader, StorageError, Vote,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Column family names
const CF_LOGS: &str = "logs";
const CF_META: &str = "meta";

/// Metadata keys (after the partition prefix)
const KEY_VOTE: &[u8] = b"vote";
const KEY_COMMITTED: &[u8] = b"committed";
const KEY_LAST_PURGED: &[u8] = b"last_purged";

/// Open (or create) the node-wide raft log database
pub fn open_log_db(data_dir: impl AsRef<Path>) -> Result<Arc<DB>, ExtentRaftError> {
    let path = data_dir.as_ref().join("raft-log");

    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let cf_descriptors = vec![
        ColumnFamilyDescriptor::new(CF_LOGS, Options::default()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ];

    let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)
        .map_err(|e| ExtentRaftError::Storage(format!("open {}: {}", path.display(), e)))?;
    Ok(Arc::new(db))
}

fn storage_err<E>(subject: ErrorSubject<RaftNodeId>, verb: ErrorVerb, e: E) -> StorageError<RaftNodeId>
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::from_io_error(subject, verb, std::io::Error::other(e))
}

/// One partition's view of the shared log database
pub struct RocksDbLogStorage {
    db: Arc<DB>,

    partition_id: PartitionId,

    /// Current vote
    vote: RwLock<Option<Vote<RaftNodeId>>>,

    /// Last committed log id
    committed: RwLock<Option<LogId<RaftNodeId>>>,

    /// Last purged log id
    last_purged: RwLock<Option<LogId<RaftNodeId>>>,
}

impl RocksDbLogStorage {
    /// Open a partition's log, loading its persisted metadata
    pub fn new(db: Arc<DB>, partition_id: PartitionId) -> Result<Self, StorageError<RaftNodeId>> {
        let mut storage = Self {
            db,
            partition_id,
            vote: RwLock::new(None),
            committed: RwLock::new(None),
            last_purged: RwLock::new(None),
        };

        let vote = storage.read_meta(KEY_VOTE, ErrorSubject::Vote)?;
        let committed = storage.read_meta(KEY_COMMITTED, ErrorSubject::Store)?;
        let last_purged = storage.read_meta(KEY_LAST_PURGED, ErrorSubject::Store)?;
        *storage.vote.get_mut() = vote;
        *storage.committed.get_mut() = committed;
        *storage.last_purged.get_mut() = last_purged;

        Ok(storage)
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError<RaftNodeId>> {
        self.db.cf_handle(name).ok_or_else(|| {
            StorageError::from_io_error(
                ErrorSubject::Store,
                ErrorVerb::Read,
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} cf not found", name)),
            )
        })
    }

    /// Partition prefix + big-endian index, so keys sort by index
    fn log_key(&self, index: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.partition_id.key_prefix());
        key[8..].copy_from_slice(&index.to_be_bytes());
        key
    }

    fn meta_key(&self, name: &[u8]) -> Vec<u8> {
        let mut key = self.partition_id.key_prefix().to_vec();
        key.extend_from_slice(name);
        key
    }

    fn read_meta<T: DeserializeOwned>(
        &self,
        name: &[u8],
        subject: ErrorSubject<RaftNodeId>,
    ) -> Result<Option<T>, StorageError<RaftNodeId>> {
        let raw = self
            .db
            .get_cf(self.cf(CF_META)?, self.meta_key(name))
            .map_err(|e| storage_err(subject.clone(), ErrorVerb::Read, e))?;
        raw.map(|data| serde_json::from_slice(&data))
            .transpose()
            .map_err(|e| storage_err(subject, ErrorVerb::Read, e))
    }

    fn write_meta<T: Serialize>(
        &self,
        name: &[u8],
        value: &T,
        subject: ErrorSubject<RaftNodeId>,
    ) -> Result<(), StorageError<RaftNodeId>> {
        let data = serde_json::to_vec(value).map_err(|e| storage_err(subject.clone(), ErrorVerb::Write, e))?;
        self.db
            .put_cf(self.cf(CF_META)?, self.meta_key(name), data)
            .map_err(|e| storage_err(subject, ErrorVerb::Write, e))
    }

    /// Persist entries in one batch
    fn write_entries<I>(&self, entries: I) -> Result<(), StorageError<RaftNodeId>>
    where
        I: IntoIterator<Item = Entry<PartitionTypeConfig>>,
    {
        let cf = self.cf(CF_LOGS)?;
        let mut batch = WriteBatch::default();
        for entry in entries {
            let value = serde_json::to_vec(&entry)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))?;
            batch.put_cf(cf, self.log_key(entry.log_id.index), value);
        }
        self.db
            .write(batch)
            .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))
    }

    /// Remove entries with index in `[from, to)`
    fn delete_range(&self, from: u64, to: u64) -> Result<(), StorageError<RaftNodeId>> {
        self.db
            .delete_range_cf(self.cf(CF_LOGS)?, self.log_key(from), self.log_key(to))
            .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Write, e))
    }

    fn last_entry_log_id(&self) -> Result<Option<LogId<RaftNodeId>>, StorageError<RaftNodeId>> {
        let mut iter = self.db.raw_iterator_cf(self.cf(CF_LOGS)?);
        iter.seek_for_prev(self.log_key(u64::MAX));
        if !iter.valid() {
            return Ok(None);
        }
        let prefix = self.partition_id.key_prefix();
        match (iter.key(), iter.value()) {
            (Some(key), Some(value)) if key.starts_with(&prefix) => {
                let entry: Entry<PartitionTypeConfig> = serde_json::from_slice(value)
                    .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
                Ok(Some(entry.log_id))
            }
            _ => Ok(None),
        }
    }
}

impl RaftLogReader<PartitionTypeConfig> for Arc<RocksDbLogStorage> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<PartitionTypeConfig>>, StorageError<RaftNodeId>> {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };

        let start_key = self.log_key(start);
        let prefix = self.partition_id.key_prefix();
        let mut entries = Vec::new();

        for item in self
            .db
            .iterator_cf(self.cf(CF_LOGS)?, IteratorMode::From(&start_key, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let entry: Entry<PartitionTypeConfig> = serde_json::from_slice(&value)
                .map_err(|e| storage_err(ErrorSubject::Logs, ErrorVerb::Read, e))?;
            if !range.contains(&entry.log_id.index) {
                break;
            }
            entries.push(entry);
        }

        Ok(entries)
    }
}

impl RaftLogStorage<PartitionTypeConfig> for Arc<RocksDbLogStorage> {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<PartitionTypeConfig>, StorageError<RaftNodeId>> {
        let last_purged = *self.last_purged.read().await;
        let last_log_id = self.last_entry_log_id()?.or(last_purged);

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<RaftNodeId>) -> Result<(), StorageError<RaftNodeId>> {
        self.write_meta(KEY_VOTE, vote, ErrorSubject::Vote)?;
        *self.vote.write().await = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<RaftNodeId>>, StorageError<RaftNodeId>> {
        Ok(*self.vote.read().await)
    }

    async fn save_committed(&mut self, committed: Option<LogId<RaftNodeId>>) -> Result<(), StorageError<RaftNodeId>> {
        if let Some(ref c) = committed {
            self.write_meta(KEY_COMMITTED, c, ErrorSubject::Store)?;
        }
        *self.committed.write().await = committed;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<RaftNodeId>>, StorageError<RaftNodeId>> {
        Ok(*self.committed.read().await)
    }

    async fn append<I>(&mut self, entries: I, callback: LogFlushed<PartitionTypeConfig>) -> Result<(), StorageError<RaftNodeId>>
    where
        I: IntoIterator<Item = Entry<PartitionTypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        self.write_entries(entries)?;
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<RaftNodeId>) -> Result<(), StorageError<RaftNodeId>> {
        tracing::debug!(partition_id = %self.partition_id, index = log_id.index, "truncating raft log");
        self.delete_range(log_id.index, u64::MAX)
    }

    async fn purge(&mut self, log_id: LogId<RaftNodeId>) -> Result<(), StorageError<RaftNodeId>> {
        self.write_meta(KEY_LAST_PURGED, &log_id, ErrorSubject::Store)?;
        *self.last_purged.write().await = Some(log_id);
        self.delete_range(0, log_id.index + 1)
    }
}
