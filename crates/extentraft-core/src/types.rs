//! Core types for extentraft

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier in the cluster
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data partition identifier
///
/// Every partition is its own replica group with its own replicated log.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Big-endian key prefix used to share one log database between partitions
    pub fn key_prefix(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionId({})", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extent identifier inside a partition's extent store
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ExtentId(pub u64);

impl ExtentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Extent 0 is never handed out by the store
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Debug for ExtentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtentId({})", self.0)
    }
}

impl fmt::Display for ExtentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the cluster this node belongs to
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClusterId({})", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an entry in a partition's replicated log
pub type LogPosition = u64;

/// Result code returned to clients for a replicated write
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultCode {
    Ok = 0xF0,
    DiskError = 0xF7,
}

impl ResultCode {
    /// Wire byte carried in the reply packet
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}
