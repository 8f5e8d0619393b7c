//! In-memory extent store

use crate::error::ExtentStoreError;
use crate::store::{ExtentStore, WriteMode};
use dashmap::DashMap;
use extentraft_core::{ExtentId, PartitionId};

/// Largest extent a write may grow, 128MB
pub const DEFAULT_MAX_EXTENT_SIZE: u64 = 128 * 1024 * 1024;

/// A single extent's bytes
#[derive(Clone, Debug, Default)]
pub struct Extent {
    data: Vec<u8>,
    deleted: bool,
    last_checksum: u32,
    sync_writes: u64,
}

impl Extent {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Extent store keeping every extent in memory
///
/// Deleted extents stay behind as tombstones so late writes observe
/// `Deleted` rather than `NotFound`.
pub struct MemExtentStore {
    /// Extents indexed by ID
    extents: DashMap<ExtentId, Extent>,

    /// Writes ending past this many bytes are rejected
    max_extent_size: u64,

    /// Partition this store belongs to
    partition_id: PartitionId,
}

impl MemExtentStore {
    pub fn new(partition_id: PartitionId) -> Self {
        Self::with_max_extent_size(partition_id, DEFAULT_MAX_EXTENT_SIZE)
    }

    pub fn with_max_extent_size(partition_id: PartitionId, max_extent_size: u64) -> Self {
        Self {
            extents: DashMap::new(),
            max_extent_size,
            partition_id,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn max_extent_size(&self) -> u64 {
        self.max_extent_size
    }

    /// Create an empty extent under an ID chosen by the cluster manager
    ///
    /// Every replica receives the same ID. Creating an existing extent
    /// keeps its bytes.
    pub fn create_extent_with_id(&self, extent_id: ExtentId) -> Result<(), ExtentStoreError> {
        if !extent_id.is_valid() {
            return Err(ExtentStoreError::Disk(format!("invalid extent id {}", extent_id)));
        }
        self.extents.entry(extent_id).or_default();
        Ok(())
    }

    /// Mark an extent deleted, dropping its bytes
    pub fn mark_delete(&self, extent_id: ExtentId) -> Result<(), ExtentStoreError> {
        let mut extent = self
            .extents
            .get_mut(&extent_id)
            .ok_or(ExtentStoreError::NotFound(extent_id))?;
        if extent.deleted {
            return Err(ExtentStoreError::Deleted(extent_id));
        }
        extent.deleted = true;
        extent.data = Vec::new();
        tracing::debug!(partition_id = %self.partition_id, extent_id = %extent_id, "extent marked deleted");
        Ok(())
    }

    /// Read `size` bytes at `offset`; short reads stop at the extent end
    pub fn read(&self, extent_id: ExtentId, offset: u64, size: usize) -> Result<Vec<u8>, ExtentStoreError> {
        let extent = self.live_extent(extent_id)?;
        let start = (offset as usize).min(extent.data.len());
        let end = start.saturating_add(size).min(extent.data.len());
        Ok(extent.data[start..end].to_vec())
    }

    /// Checksum carried by the most recent write to an extent
    pub fn last_checksum(&self, extent_id: ExtentId) -> Result<u32, ExtentStoreError> {
        Ok(self.live_extent(extent_id)?.last_checksum)
    }

    /// Number of writes that requested synchronous durability
    pub fn sync_writes(&self, extent_id: ExtentId) -> Result<u64, ExtentStoreError> {
        Ok(self.live_extent(extent_id)?.sync_writes)
    }

    pub fn extent_len(&self, extent_id: ExtentId) -> Result<usize, ExtentStoreError> {
        Ok(self.live_extent(extent_id)?.len())
    }

    /// Live (not deleted) extent count
    pub fn extent_count(&self) -> usize {
        self.extents.iter().filter(|e| !e.deleted).count()
    }

    fn live_extent(
        &self,
        extent_id: ExtentId,
    ) -> Result<dashmap::mapref::one::Ref<'_, ExtentId, Extent>, ExtentStoreError> {
        let extent = self
            .extents
            .get(&extent_id)
            .ok_or(ExtentStoreError::NotFound(extent_id))?;
        if extent.deleted {
            return Err(ExtentStoreError::Deleted(extent_id));
        }
        Ok(extent)
    }
}

impl ExtentStore for MemExtentStore {
    fn write(
        &self,
        extent_id: ExtentId,
        offset: i64,
        size: i64,
        data: &[u8],
        checksum: u32,
        mode: WriteMode,
    ) -> Result<(), ExtentStoreError> {
        let offset = usize::try_from(offset)
            .map_err(|_| ExtentStoreError::Disk(format!("negative offset {}", offset)))?;
        let size = usize::try_from(size)
            .map_err(|_| ExtentStoreError::Disk(format!("negative size {}", size)))?;
        if size != data.len() {
            return Err(ExtentStoreError::Disk(format!(
                "size {} does not match payload length {}",
                size,
                data.len()
            )));
        }

        let mut extent = self
            .extents
            .get_mut(&extent_id)
            .ok_or(ExtentStoreError::NotFound(extent_id))?;
        if extent.deleted {
            return Err(ExtentStoreError::Deleted(extent_id));
        }

        let end = offset
            .checked_add(size)
            .filter(|end| *end as u64 <= self.max_extent_size)
            .ok_or_else(|| {
                ExtentStoreError::Disk(format!(
                    "write of {} bytes at offset {} exceeds max extent size {}",
                    size, offset, self.max_extent_size
                ))
            })?;

        if extent.data.len() < end {
            extent.data.resize(end, 0);
        }
        extent.data[offset..end].copy_from_slice(data);
        extent.last_checksum = checksum;
        if mode.is_sync() {
            extent.sync_writes += 1;
        }
        Ok(())
    }

    fn used_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.data.len() as u64).sum()
    }
}
