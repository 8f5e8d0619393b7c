//! Extent store error taxonomy

use extentraft_core::ExtentId;
use thiserror::Error;

/// Failure reported by an extent store write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtentStoreError {
    #[error("extent {0} does not exist")]
    NotFound(ExtentId),

    #[error("extent {0} has been deleted")]
    Deleted(ExtentId),

    #[error("disk error: {0}")]
    Disk(String),
}

impl ExtentStoreError {
    /// The extent was removed by a delete ordered in the same log, so the write is a no-op
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Deleted(_))
    }

    pub fn is_disk_error(&self) -> bool {
        matches!(self, Self::Disk(_))
    }
}
