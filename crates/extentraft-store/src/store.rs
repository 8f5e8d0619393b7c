//! Extent store contract consumed by the replicated state machine

use crate::error::ExtentStoreError;
use extentraft_core::ExtentId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durability requested for a single write
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WriteMode {
    /// The store may buffer the write
    Buffered,
    /// The write must be durable before returning
    Sync,
}

impl WriteMode {
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync)
    }
}

/// Byte-range storage engine hosting a partition's extents
///
/// Writes may block on I/O; callers on an async runtime move them off the
/// executor threads.
pub trait ExtentStore: Send + Sync {
    /// Write `size` bytes of `data` at `offset` inside an existing extent
    fn write(
        &self,
        extent_id: ExtentId,
        offset: i64,
        size: i64,
        data: &[u8],
        checksum: u32,
        mode: WriteMode,
    ) -> Result<(), ExtentStoreError>;

    /// Bytes currently used by all extents
    fn used_bytes(&self) -> u64;
}

/// Thread-safe extent store handle
pub type ExtentStoreHandle = Arc<dyn ExtentStore>;
