//! Replicated log seam used by the submission path and the leader gate

use crate::apply::AckCode;
use crate::types::{PartitionRequest, PartitionTypeConfig, RaftNodeId};
use extentraft_core::{ExtentRaftError, NodeId, PartitionId, Result};
use openraft::error::{ClientWriteError, RaftError};
use openraft::Raft;
use std::future::Future;

/// The raft instance driving one partition
pub type PartitionRaft = Raft<PartitionTypeConfig>;

/// A partition's replicated log, as seen by the proposer
pub trait ReplicatedLog: Send + Sync {
    /// Propose an encoded frame; resolves with the leader's apply result
    /// once the entry is committed and applied
    fn propose(&self, frame: Vec<u8>) -> impl Future<Output = Result<AckCode>> + Send;

    /// Current leader of the replica group, if known
    fn leader(&self) -> impl Future<Output = Option<NodeId>> + Send;

    /// Whether the local replica is the leader
    fn is_leader(&self) -> impl Future<Output = bool> + Send;
}

/// Replicated log backed by an openraft group
#[derive(Clone)]
pub struct OpenRaftLog {
    raft: PartitionRaft,
    partition_id: PartitionId,
    node_id: RaftNodeId,
}

impl OpenRaftLog {
    pub fn new(raft: PartitionRaft, partition_id: PartitionId, node_id: RaftNodeId) -> Self {
        Self {
            raft,
            partition_id,
            node_id,
        }
    }

    pub fn raft(&self) -> &PartitionRaft {
        &self.raft
    }
}

impl ReplicatedLog for OpenRaftLog {
    async fn propose(&self, frame: Vec<u8>) -> Result<AckCode> {
        let request = PartitionRequest {
            partition_id: self.partition_id,
            frame,
        };
        match self.raft.client_write(request).await {
            Ok(response) => Ok(response.data.ack),
            Err(RaftError::APIError(ClientWriteError::ForwardToLeader(forward))) => {
                Err(ExtentRaftError::NotLeader {
                    leader: forward.leader_id.map(NodeId::new),
                })
            }
            Err(e) => Err(ExtentRaftError::LogSubmit(e.to_string())),
        }
    }

    async fn leader(&self) -> Option<NodeId> {
        self.raft.current_leader().await.map(NodeId::new)
    }

    async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.node_id)
    }
}
