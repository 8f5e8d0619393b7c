//! Error types for extentraft

use crate::types::{NodeId, PartitionId};
use thiserror::Error;

/// Failure to build, encode or decode a random-write log command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown random write log version: expected {expected:#x}, actual {actual:#x}")]
    BadVersion { expected: u32, actual: u32 },

    #[error("command frame truncated at {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("invalid data size {0}")]
    InvalidSize(i64),

    #[error("unknown write opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("declared size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: i64, actual: usize },

    #[error("negative extent offset {0}")]
    NegativeOffset(i64),

    #[error("invalid extent id {0}")]
    InvalidExtent(u64),
}

/// Main error type for extentraft
#[derive(Error, Debug)]
pub enum ExtentRaftError {
    // Replicated log errors
    #[error("not leader, current leader is {leader:?}")]
    NotLeader { leader: Option<NodeId> },

    #[error("raft log rejected proposal: {0}")]
    LogSubmit(String),

    #[error("raft log error: {0}")]
    RaftLog(String),

    // Partition errors
    #[error("partition not found: {0}")]
    PartitionNotFound(PartitionId),

    #[error("partition already exists: {0}")]
    PartitionExists(PartitionId),

    #[error(transparent)]
    Command(#[from] CommandError),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtentRaftError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NotLeader { .. } | Self::LogSubmit(_))
    }

    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }
}

/// Result type alias for extentraft
pub type Result<T> = std::result::Result<T, ExtentRaftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_is_retriable() {
        let err = ExtentRaftError::NotLeader {
            leader: Some(NodeId::new(2)),
        };
        assert!(err.is_retriable());
        assert!(err.is_not_leader());
    }

    #[test]
    fn test_command_errors_are_terminal() {
        let err: ExtentRaftError = CommandError::InvalidSize(-1).into();
        assert!(!err.is_retriable());
        assert!(matches!(err, ExtentRaftError::Command(CommandError::InvalidSize(-1))));
    }

    #[test]
    fn test_bad_version_message() {
        let err = CommandError::BadVersion {
            expected: 0xFF,
            actual: 0x01,
        };
        assert_eq!(
            err.to_string(),
            "unknown random write log version: expected 0xff, actual 0x1"
        );
    }
}
