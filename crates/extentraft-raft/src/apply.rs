//! Random-write apply state machine
//!
//! Applies committed random-write commands to the partition's extent store.
//! The replicated log calls `apply` for one partition at a time, in
//! increasing log position order; nothing here takes a partition lock.

use crate::alarm::{apply_alarm_key, AlarmHandle};
use crate::command::WriteCommand;
use crate::snapshot::AppliedPositionIter;
use extentraft_core::{
    ClusterId, CommandError, LogPosition, PartitionConfig, PartitionId, ResultCode,
};
use extentraft_store::{ExtentStoreError, ExtentStoreHandle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Outcome of applying one command, handed back to the replicated log
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AckCode {
    Ok,
    Failed,
}

impl From<AckCode> for ResultCode {
    fn from(ack: AckCode) -> Self {
        match ack {
            AckCode::Ok => ResultCode::Ok,
            AckCode::Failed => ResultCode::DiskError,
        }
    }
}

/// Log position of the most recently handled command
#[derive(Debug, Default)]
pub struct AppliedPosition(AtomicU64);

impl AppliedPosition {
    pub fn new(position: LogPosition) -> Self {
        Self(AtomicU64::new(position))
    }

    pub fn get(&self) -> LogPosition {
        self.0.load(Ordering::Acquire)
    }

    /// Never moves backwards
    pub fn advance(&self, position: LogPosition) {
        self.0.fetch_max(position, Ordering::AcqRel);
    }

    /// Replace the position wholesale (snapshot install)
    pub fn reset(&self, position: LogPosition) {
        self.0.store(position, Ordering::Release);
    }
}

/// Why an apply could not be completed
#[derive(Debug)]
enum ApplyFailure {
    Decode(CommandError),
    /// Entry tagged for another partition reached this state machine
    ForeignPartition(PartitionId),
    Store {
        command: WriteCommand,
        last_error: ExtentStoreError,
        attempts: u32,
    },
}

/// Per-partition random-write state machine
pub struct RandomWriteApplier {
    cluster_id: ClusterId,
    partition_id: PartitionId,
    store: ExtentStoreHandle,
    alarm: AlarmHandle,
    applied: AppliedPosition,
    max_write_attempts: u32,
    failed_applies: AtomicU64,
}

impl RandomWriteApplier {
    pub fn new(
        cluster_id: ClusterId,
        partition_id: PartitionId,
        store: ExtentStoreHandle,
        alarm: AlarmHandle,
        config: &PartitionConfig,
    ) -> Self {
        Self {
            cluster_id,
            partition_id,
            store,
            alarm,
            applied: AppliedPosition::default(),
            max_write_attempts: config.max_write_attempts.max(1),
            failed_applies: AtomicU64::new(0),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn store(&self) -> &ExtentStoreHandle {
        &self.store
    }

    pub fn applied_position(&self) -> LogPosition {
        self.applied.get()
    }

    /// Commands that ended in a durable failure since start
    pub fn failed_applies(&self) -> u64 {
        self.failed_applies.load(Ordering::Relaxed)
    }

    /// Record that everything up to `position` has been handled
    pub fn upload_applied_position(&self, position: LogPosition) {
        self.applied.advance(position);
    }

    /// Apply a committed frame at `position`
    ///
    /// Exactly one of two side effects happens: the applied position
    /// advances to `position`, or an alarm is raised and the position stays.
    pub fn apply(&self, frame: &[u8], position: LogPosition) -> AckCode {
        match self.try_apply(frame, position) {
            Ok(()) => {
                self.upload_applied_position(position);
                AckCode::Ok
            }
            Err(failure) => {
                self.escalate(position, failure);
                AckCode::Failed
            }
        }
    }

    /// Apply a committed entry tagged with the partition it was proposed to
    ///
    /// An entry tagged for another partition is never written to this
    /// store; it fails like an undecodable frame.
    pub fn apply_tagged(&self, partition_id: PartitionId, frame: &[u8], position: LogPosition) -> AckCode {
        if partition_id == self.partition_id {
            return self.apply(frame, position);
        }
        error!(
            partition_id = %self.partition_id,
            entry_partition = %partition_id,
            log_position = position,
            "log entry tagged with another partition"
        );
        self.escalate(position, ApplyFailure::ForeignPartition(partition_id));
        AckCode::Failed
    }

    fn try_apply(&self, frame: &[u8], position: LogPosition) -> Result<(), ApplyFailure> {
        let command = WriteCommand::decode(frame).map_err(|e| {
            error!(
                partition_id = %self.partition_id,
                log_position = position,
                error = %e,
                "random write log unmarshal failed"
            );
            ApplyFailure::Decode(e)
        })?;

        debug!(
            partition_id = %self.partition_id,
            log_position = position,
            extent_id = %command.extent_id,
            offset = command.offset,
            size = command.size(),
            "applying random write"
        );

        let mut last_error = None;
        for attempt in 0..self.max_write_attempts {
            match self.store.write(
                command.extent_id,
                command.offset,
                command.size(),
                &command.data,
                command.checksum,
                command.write_mode(),
            ) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_ignorable() => {
                    debug!(
                        partition_id = %self.partition_id,
                        log_position = position,
                        extent_id = %command.extent_id,
                        reason = %e,
                        "random write skipped, extent removed by an ordered delete"
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        partition_id = %self.partition_id,
                        log_position = position,
                        extent_id = %command.extent_id,
                        offset = command.offset,
                        size = command.size(),
                        attempt,
                        error = %e,
                        "random write apply failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(ApplyFailure::Store {
            command,
            last_error: last_error
                .unwrap_or_else(|| ExtentStoreError::Disk("no write attempted".to_string())),
            attempts: self.max_write_attempts,
        })
    }

    fn escalate(&self, position: LogPosition, failure: ApplyFailure) {
        self.failed_applies.fetch_add(1, Ordering::Relaxed);
        let key = apply_alarm_key(self.cluster_id.as_str(), self.partition_id.0);
        let detail = match &failure {
            ApplyFailure::Decode(e) => format!(
                "Datapartition({}) ApplyID({}) undecodable command: {}",
                self.partition_id, position, e
            ),
            ApplyFailure::ForeignPartition(tagged) => format!(
                "Datapartition({}) ApplyID({}) entry belongs to {}",
                self.partition_id, position, tagged
            ),
            ApplyFailure::Store {
                command,
                last_error,
                attempts,
            } => format!(
                "Datapartition({})_Extent({}) ApplyID({}) failed after {} attempts: {}",
                self.partition_id, command.extent_id, position, attempts, last_error
            ),
        };
        self.alarm.raise(&key, &detail);
    }

    /// Open the single-record snapshot sequence over the applied position
    pub fn snapshot_iter(&self) -> AppliedPositionIter {
        AppliedPositionIter::open(self.applied_position())
    }

    /// Restore the applied position from snapshot records
    pub fn restore<I>(&self, records: I) -> Result<LogPosition, CommandError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let position = crate::snapshot::restore(records)?;
        self.applied.reset(position);
        debug!(partition_id = %self.partition_id, applied_position = position, "applied position restored");
        Ok(position)
    }
}
