//! In-process replicated log
//!
//! Orders proposals for a set of co-located replica state machines without
//! any network. Used for standalone nodes and for exercising the submission
//! path end to end.

use crate::apply::{AckCode, RandomWriteApplier};
use crate::log::ReplicatedLog;
use extentraft_core::{ExtentRaftError, LogPosition, NodeId, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

pub struct LocalLog {
    node_id: NodeId,

    /// Replica state machines; the first one belongs to the local node
    replicas: Vec<Arc<RandomWriteApplier>>,

    /// Last assigned position, held across the apply to serialize it
    last_position: Mutex<LogPosition>,

    leader: RwLock<Option<NodeId>>,
}

impl LocalLog {
    /// Log led by `node_id`, applying to `replicas` in order
    pub fn new(node_id: NodeId, replicas: Vec<Arc<RandomWriteApplier>>) -> Self {
        Self {
            node_id,
            replicas,
            last_position: Mutex::new(0),
            leader: RwLock::new(Some(node_id)),
        }
    }

    /// Move leadership (None while an election is in progress)
    pub async fn set_leader(&self, leader: Option<NodeId>) {
        *self.leader.write().await = leader;
    }

    pub async fn last_position(&self) -> LogPosition {
        *self.last_position.lock().await
    }

    pub fn replicas(&self) -> &[Arc<RandomWriteApplier>] {
        &self.replicas
    }
}

impl ReplicatedLog for LocalLog {
    async fn propose(&self, frame: Vec<u8>) -> Result<AckCode> {
        let leader = *self.leader.read().await;
        if leader != Some(self.node_id) {
            return Err(ExtentRaftError::NotLeader { leader });
        }

        let mut last_position = self.last_position.lock().await;
        let position = *last_position + 1;
        // Consumed before any replica applies, so a failed round never reuses it
        *last_position = position;
        let frame = Arc::new(frame);

        let mut leader_ack = AckCode::Failed;
        let mut failures = Vec::new();
        for (i, replica) in self.replicas.iter().enumerate() {
            let replica = replica.clone();
            let frame = frame.clone();
            match tokio::task::spawn_blocking(move || replica.apply(&frame, position)).await {
                Ok(ack) if i == 0 => leader_ack = ack,
                Ok(_) => {}
                Err(e) => failures.push(format!("replica {}: {}", i, e)),
            }
        }

        if !failures.is_empty() {
            error!(
                node_id = %self.node_id,
                log_position = position,
                failures = ?failures,
                "local log entry not applied on every replica"
            );
            return Err(ExtentRaftError::LogSubmit(failures.join("; ")));
        }

        debug!(node_id = %self.node_id, log_position = position, ack = ?leader_ack, "local log entry applied");
        Ok(leader_ack)
    }

    async fn leader(&self) -> Option<NodeId> {
        *self.leader.read().await
    }

    async fn is_leader(&self) -> bool {
        *self.leader.read().await == Some(self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::tests::{applier_with, RecordingAlarm};
    use crate::command::WriteCommand;
    use extentraft_core::{ExtentId, PartitionId};
    use extentraft_store::{ExtentStore, ExtentStoreError, MemExtentStore, WriteMode};

    /// Store whose writes panic, standing in for a crashed apply thread
    struct PanickingStore;

    impl ExtentStore for PanickingStore {
        fn write(
            &self,
            _extent_id: ExtentId,
            _offset: i64,
            _size: i64,
            _data: &[u8],
            _checksum: u32,
            _mode: WriteMode,
        ) -> std::result::Result<(), ExtentStoreError> {
            panic!("extent store crashed");
        }

        fn used_bytes(&self) -> u64 {
            0
        }
    }

    fn frame(offset: i64, data: &[u8]) -> Vec<u8> {
        WriteCommand::from_parts(0x0F, 1, offset, data.len() as i64, data.to_vec(), 0)
            .unwrap()
            .encode()
    }

    #[tokio::test]
    async fn test_failed_round_does_not_reuse_position() {
        let store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        store.create_extent_with_id(ExtentId::new(1)).unwrap();
        let leader = Arc::new(applier_with(store.clone(), Arc::new(RecordingAlarm::default())));
        let broken = Arc::new(applier_with(Arc::new(PanickingStore), Arc::new(RecordingAlarm::default())));
        let log = LocalLog::new(NodeId::new(1), vec![leader.clone(), broken]);

        let err = log.propose(frame(0, &[1])).await.unwrap_err();
        assert!(matches!(err, ExtentRaftError::LogSubmit(_)));
        assert_eq!(log.last_position().await, 1);
        assert_eq!(leader.applied_position(), 1);

        assert!(log.propose(frame(1, &[2])).await.is_err());
        assert_eq!(log.last_position().await, 2);
        assert_eq!(leader.applied_position(), 2);
        assert_eq!(store.read(ExtentId::new(1), 0, 2).unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_propose_on_follower_keeps_position() {
        let store = Arc::new(MemExtentStore::new(PartitionId::new(1)));
        let applier = Arc::new(applier_with(store, Arc::new(RecordingAlarm::default())));
        let log = LocalLog::new(NodeId::new(2), vec![applier]);
        log.set_leader(Some(NodeId::new(1))).await;

        assert!(log.propose(frame(0, &[1])).await.unwrap_err().is_not_leader());
        assert_eq!(log.last_position().await, 0);
    }
}
