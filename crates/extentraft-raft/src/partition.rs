//! Data partition: submission path and leader consistency gate

use crate::apply::RandomWriteApplier;
use crate::command::WriteCommand;
use crate::log::ReplicatedLog;
use extentraft_core::{ExtentRaftError, LogPosition, NodeId, PartitionId, Result, ResultCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parsed client write, as delivered by the packet layer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteRequest {
    pub opcode: u8,
    pub extent_id: u64,
    pub offset: i64,
    pub size: i64,
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Partition availability as reported to the cluster manager
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PartitionState {
    ReadWrite,
    ReadOnly,
    /// A committed command could not be applied; the replica needs an operator
    Unavailable,
}

/// Status snapshot served to admin endpoints and heartbeats
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub partition_id: PartitionId,
    pub state: PartitionState,
    pub used: u64,
    pub capacity: u64,
    pub applied_position: LogPosition,
    pub failed_applies: u64,
    pub replicas: Vec<String>,
    pub leader: Option<NodeId>,
    pub is_leader: bool,
}

/// One local replica of a data partition
pub struct DataPartition<L> {
    applier: Arc<RandomWriteApplier>,
    log: L,
    replicas: Vec<String>,
    capacity: u64,
}

impl<L: ReplicatedLog> DataPartition<L> {
    pub fn new(applier: Arc<RandomWriteApplier>, log: L, replicas: Vec<String>, capacity: u64) -> Self {
        Self {
            applier,
            log,
            replicas,
            capacity,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.applier.partition_id()
    }

    pub fn applier(&self) -> &Arc<RandomWriteApplier> {
        &self.applier
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    pub fn applied_position(&self) -> LogPosition {
        self.applier.applied_position()
    }

    pub fn used(&self) -> u64 {
        self.applier.store().used_bytes()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Replicate a random write and wait for the leader's apply result
    ///
    /// Rejections by the log (not leader, shutdown) are returned as errors
    /// without retrying; the caller decides whether to redirect.
    pub async fn random_write_submit(&self, request: WriteRequest) -> Result<ResultCode> {
        let command = WriteCommand::from_parts(
            request.opcode,
            request.extent_id,
            request.offset,
            request.size,
            request.data,
            request.checksum,
        )?;
        let frame = command.encode();

        let ack = self.log.propose(frame).await?;
        let code = ResultCode::from(ack);

        debug!(
            partition_id = %self.partition_id(),
            extent_id = %command.extent_id,
            offset = command.offset,
            size = command.size(),
            result = ?code,
            "random write submitted"
        );
        Ok(code)
    }

    /// Reject strongly consistent reads on a follower
    pub async fn check_leader(&self) -> Result<()> {
        if self.log.is_leader().await {
            return Ok(());
        }
        let leader = self.log.leader().await;
        warn!(
            partition_id = %self.partition_id(),
            leader = ?leader,
            "read rejected, local replica is not leader"
        );
        Err(ExtentRaftError::NotLeader { leader })
    }

    pub async fn status(&self) -> PartitionStatus {
        let used = self.used();
        let failed_applies = self.applier.failed_applies();
        let state = if failed_applies > 0 {
            PartitionState::Unavailable
        } else if used >= self.capacity {
            PartitionState::ReadOnly
        } else {
            PartitionState::ReadWrite
        };

        PartitionStatus {
            partition_id: self.partition_id(),
            state,
            used,
            capacity: self.capacity,
            applied_position: self.applied_position(),
            failed_applies,
            replicas: self.replicas.clone(),
            leader: self.log.leader().await,
            is_leader: self.log.is_leader().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::tests::{applier_with, RecordingAlarm, ScriptedStore};
    use crate::local::LocalLog;
    use extentraft_core::{CommandError, ExtentId};
    use extentraft_store::{ExtentStoreError, MemExtentStore, WriteMode};

    fn request(extent_id: u64, offset: i64, data: Vec<u8>) -> WriteRequest {
        WriteRequest {
            opcode: 0x0F,
            extent_id,
            offset,
            size: data.len() as i64,
            data,
            checksum: 0xABCD,
        }
    }

    fn partition_over(
        store: Arc<ScriptedStore>,
        alarm: Arc<RecordingAlarm>,
    ) -> DataPartition<LocalLog> {
        let applier = Arc::new(applier_with(store, alarm));
        let log = LocalLog::new(NodeId::new(1), vec![applier.clone()]);
        DataPartition::new(applier, log, vec!["127.0.0.1:17310".to_string()], 1024)
    }

    #[tokio::test]
    async fn test_submit_end_to_end() {
        let store = Arc::new(ScriptedStore::default());
        let alarm = Arc::new(RecordingAlarm::default());
        let partition = partition_over(store.clone(), alarm.clone());

        let code = partition
            .random_write_submit(request(7, 100, vec![1, 2, 3, 4]))
            .await
            .unwrap();

        assert_eq!(code, ResultCode::Ok);
        assert_eq!(
            store.writes.lock().unwrap().as_slice(),
            &[(ExtentId::new(7), 100, 4, vec![1, 2, 3, 4], 0xABCD, WriteMode::Buffered)]
        );
        assert_eq!(partition.applied_position(), partition.log().last_position().await);
        assert_eq!(partition.applied_position(), 1);
        assert_eq!(alarm.count(), 0);
    }

    #[tokio::test]
    async fn test_disk_failure_maps_to_disk_error() {
        let store = Arc::new(ScriptedStore::default());
        *store.always_fail.lock().unwrap() = Some(ExtentStoreError::Disk("EIO".to_string()));
        let alarm = Arc::new(RecordingAlarm::default());
        let partition = partition_over(store, alarm.clone());

        let code = partition
            .random_write_submit(request(7, 0, vec![1]))
            .await
            .unwrap();

        assert_eq!(code, ResultCode::DiskError);
        assert_eq!(partition.applied_position(), 0);
        assert_eq!(alarm.count(), 1);
        assert_eq!(partition.status().await.state, PartitionState::Unavailable);
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_proposing() {
        let store = Arc::new(ScriptedStore::default());
        let partition = partition_over(store.clone(), Arc::new(RecordingAlarm::default()));

        let mut bad = request(7, 0, vec![1, 2]);
        bad.size = 3;
        let err = partition.random_write_submit(bad).await.unwrap_err();

        assert!(matches!(
            err,
            ExtentRaftError::Command(CommandError::SizeMismatch { declared: 3, actual: 2 })
        ));
        assert_eq!(partition.log().last_position().await, 0);
        assert_eq!(store.attempts(), 0);
    }

    #[tokio::test]
    async fn test_submit_on_follower_is_rejected() {
        let store = Arc::new(ScriptedStore::default());
        let partition = partition_over(store.clone(), Arc::new(RecordingAlarm::default()));
        partition.log().set_leader(Some(NodeId::new(2))).await;

        let err = partition
            .random_write_submit(request(7, 0, vec![1]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExtentRaftError::NotLeader { leader: Some(NodeId(2)) }
        ));
        assert_eq!(store.attempts(), 0);
    }

    #[tokio::test]
    async fn test_leader_gate() {
        let store = Arc::new(ScriptedStore::default());
        let partition = partition_over(store.clone(), Arc::new(RecordingAlarm::default()));

        assert!(partition.check_leader().await.is_ok());
        assert_eq!(partition.applied_position(), 0);
        assert_eq!(store.attempts(), 0);

        partition.log().set_leader(None).await;
        assert!(matches!(
            partition.check_leader().await,
            Err(ExtentRaftError::NotLeader { leader: None })
        ));

        partition.log().set_leader(Some(NodeId::new(3))).await;
        let err = partition.check_leader().await.unwrap_err();
        assert!(err.is_not_leader());
    }

    #[tokio::test]
    async fn test_replicas_converge() {
        let leader_store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        let follower_store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        for store in [&leader_store, &follower_store] {
            store.create_extent_with_id(ExtentId::new(1)).unwrap();
        }
        let leader = Arc::new(applier_with(leader_store.clone(), Arc::new(RecordingAlarm::default())));
        let follower = Arc::new(applier_with(
            follower_store.clone(),
            Arc::new(RecordingAlarm::default()),
        ));
        let log = LocalLog::new(NodeId::new(1), vec![leader.clone(), follower.clone()]);
        let partition = Arc::new(DataPartition::new(leader, log, vec![], 1 << 20));

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let partition = partition.clone();
            tasks.push(tokio::spawn(async move {
                partition
                    .random_write_submit(request(1, i as i64 * 2, vec![i, i]))
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), ResultCode::Ok);
        }

        assert_eq!(partition.applied_position(), 16);
        assert_eq!(follower.applied_position(), 16);
        assert_eq!(
            leader_store.read(ExtentId::new(1), 0, 64).unwrap(),
            follower_store.read(ExtentId::new(1), 0, 64).unwrap()
        );
        assert_eq!(leader_store.extent_len(ExtentId::new(1)).unwrap(), 32);
    }

    #[tokio::test]
    async fn test_huge_offset_reports_disk_error() {
        let store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        store.create_extent_with_id(ExtentId::new(3)).unwrap();
        let alarm = Arc::new(RecordingAlarm::default());
        let applier = Arc::new(applier_with(store.clone(), alarm.clone()));
        let log = LocalLog::new(NodeId::new(1), vec![applier.clone()]);
        let partition = DataPartition::new(applier, log, vec![], 1 << 20);

        let code = partition
            .random_write_submit(request(3, i64::MAX, vec![1, 2]))
            .await
            .unwrap();

        assert_eq!(code, ResultCode::DiskError);
        assert_eq!(alarm.count(), 1);
        assert_eq!(partition.applied_position(), 0);
        assert_eq!(partition.log().last_position().await, 1);
        assert_eq!(store.extent_len(ExtentId::new(3)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_to_deleted_extent_is_ok() {
        let store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        let extent_id = ExtentId::new(4);
        store.create_extent_with_id(extent_id).unwrap();
        store.mark_delete(extent_id).unwrap();
        let alarm = Arc::new(RecordingAlarm::default());
        let applier = Arc::new(applier_with(store, alarm.clone()));
        let log = LocalLog::new(NodeId::new(1), vec![applier.clone()]);
        let partition = DataPartition::new(applier, log, vec![], 1 << 20);

        let code = partition
            .random_write_submit(request(extent_id.0, 0, vec![1]))
            .await
            .unwrap();

        assert_eq!(code, ResultCode::Ok);
        assert_eq!(partition.applied_position(), 1);
        assert_eq!(alarm.count(), 0);
        let status = partition.status().await;
        assert_eq!(status.state, PartitionState::ReadWrite);
        assert!(status.is_leader);
    }
}
