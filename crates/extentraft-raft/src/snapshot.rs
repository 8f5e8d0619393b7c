//! Snapshot records for the random-write state machine
//!
//! Beyond the extent bytes (moved by extent repair, not by raft), the only
//! durable state is the applied position. A snapshot is therefore a single
//! 8-byte big-endian record.

use extentraft_core::{CommandError, LogPosition};

/// Length of one snapshot record
pub const RECORD_LEN: usize = 8;

/// Finite, single-record sequence over an applied position
#[derive(Debug, Clone)]
pub struct AppliedPositionIter {
    position: LogPosition,
    done: bool,
}

impl AppliedPositionIter {
    pub fn open(position: LogPosition) -> Self {
        Self {
            position,
            done: false,
        }
    }

    /// Position captured when the iterator was opened
    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Release the iterator; safe to call repeatedly
    pub fn close(&mut self) {
        self.done = true;
    }
}

impl Iterator for AppliedPositionIter {
    type Item = [u8; RECORD_LEN];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(self.position.to_be_bytes())
    }
}

/// Read an applied position back from snapshot records; the last record wins
pub fn restore<I>(records: I) -> Result<LogPosition, CommandError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut position = 0;
    for record in records {
        let record = record.as_ref();
        let bytes: [u8; RECORD_LEN] = record
            .get(..RECORD_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(CommandError::Truncated {
                field: "applied_position",
                needed: RECORD_LEN,
                remaining: record.len(),
            })?;
        position = LogPosition::from_be_bytes(bytes);
    }
    Ok(position)
}

/// Split a snapshot payload back into records
pub fn payload_records(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload.chunks(RECORD_LEN)
}
