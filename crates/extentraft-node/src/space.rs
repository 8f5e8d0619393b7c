//! Partitions hosted by this data node

use dashmap::DashMap;
use extentraft_core::{ClusterId, ExtentRaftError, NodeConfig, NodeId, PartitionId, Result};
use extentraft_raft::{
    create_raft, open_log_db, openraft_config, AlarmHandle, DataPartition, HttpRaftNetworkFactory,
    OpenRaftLog, PartitionRaft, PartitionStateMachine, RaftNodeId, RandomWriteApplier,
    ReplicaNode, RocksDbLogStorage, TracingAlarm,
};
use extentraft_store::MemExtentStore;
use rocksdb::DB;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One replica of a new partition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaSpec {
    pub node_id: u64,
    pub addr: String,
}

/// Partition creation request, as issued by the cluster manager
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatePartitionRequest {
    pub partition_id: u64,
    pub replicas: Vec<ReplicaSpec>,
    /// Overrides the node's default partition capacity
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
}

/// A hosted partition and the pieces the API needs to reach
pub struct PartitionHandle {
    pub partition: DataPartition<OpenRaftLog>,
    pub store: Arc<MemExtentStore>,
    pub members: BTreeMap<RaftNodeId, ReplicaNode>,
}

impl PartitionHandle {
    pub fn raft(&self) -> &PartitionRaft {
        self.partition.log().raft()
    }
}

pub struct PartitionSpace {
    node_id: NodeId,
    config: NodeConfig,
    db: Arc<DB>,
    alarm: AlarmHandle,
    partitions: DashMap<PartitionId, Arc<PartitionHandle>>,
}

impl PartitionSpace {
    pub fn new(config: NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = open_log_db(&config.data_dir)?;
        let alarm: AlarmHandle = Arc::new(TracingAlarm::new(config.partition.alarm_interval));

        Ok(Self {
            node_id: NodeId::new(config.node_id),
            config,
            db,
            alarm,
            partitions: DashMap::new(),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Start a replica of a partition on this node
    ///
    /// The replica with the lowest node id initializes the raft group; the
    /// others wait to be contacted by it.
    pub async fn create(&self, request: CreatePartitionRequest) -> Result<Arc<PartitionHandle>> {
        let partition_id = PartitionId::new(request.partition_id);
        if self.partitions.contains_key(&partition_id) {
            return Err(ExtentRaftError::PartitionExists(partition_id));
        }

        let members: BTreeMap<RaftNodeId, ReplicaNode> = request
            .replicas
            .iter()
            .map(|r| (r.node_id, ReplicaNode::new(r.addr.clone())))
            .collect();
        if !members.contains_key(&self.node_id.0) {
            return Err(ExtentRaftError::Config(format!(
                "{} is not a replica of {}",
                self.node_id, partition_id
            )));
        }

        let store = Arc::new(MemExtentStore::with_max_extent_size(
            partition_id,
            self.config.partition.max_extent_size,
        ));
        let applier = Arc::new(RandomWriteApplier::new(
            ClusterId::new(self.config.cluster_id.clone()),
            partition_id,
            store.clone(),
            self.alarm.clone(),
            &self.config.partition,
        ));
        let state_machine = Arc::new(PartitionStateMachine::new(applier.clone()));
        let log_storage = Arc::new(
            RocksDbLogStorage::new(self.db.clone(), partition_id)
                .map_err(|e| ExtentRaftError::Storage(e.to_string()))?,
        );
        let network = HttpRaftNetworkFactory::new(partition_id, self.config.raft.rpc_timeout)?;
        let raft_config = openraft_config(
            &format!("{}-{}", self.config.cluster_id, partition_id.0),
            &self.config.raft,
        )?;

        let raft = create_raft(self.node_id.0, raft_config, network, log_storage, state_machine).await?;

        if members.keys().next() == Some(&self.node_id.0) {
            if let Err(e) = raft.initialize(members.clone()).await {
                // Already initialized on a previous run
                warn!(partition_id = %partition_id, error = %e, "raft group not initialized");
            }
        }

        let replicas = members.values().map(|n| n.addr.clone()).collect();
        let capacity = request.capacity_bytes.unwrap_or(self.config.partition.capacity_bytes);
        let handle = Arc::new(PartitionHandle {
            partition: DataPartition::new(
                applier,
                OpenRaftLog::new(raft, partition_id, self.node_id.0),
                replicas,
                capacity,
            ),
            store,
            members,
        });

        match self.partitions.entry(partition_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                let _ = handle.raft().shutdown().await;
                Err(ExtentRaftError::PartitionExists(partition_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle.clone());
                info!(
                    partition_id = %partition_id,
                    replicas = handle.members.len(),
                    "partition created"
                );
                Ok(handle)
            }
        }
    }

    pub fn get(&self, partition_id: PartitionId) -> Result<Arc<PartitionHandle>> {
        self.partitions
            .get(&partition_id)
            .map(|p| p.clone())
            .ok_or(ExtentRaftError::PartitionNotFound(partition_id))
    }

    pub fn list(&self) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self.partitions.iter().map(|p| *p.key()).collect();
        ids.sort();
        ids
    }

    /// Stop and forget a partition's replica
    pub async fn remove(&self, partition_id: PartitionId) -> Result<()> {
        let (_, handle) = self
            .partitions
            .remove(&partition_id)
            .ok_or(ExtentRaftError::PartitionNotFound(partition_id))?;
        handle
            .raft()
            .shutdown()
            .await
            .map_err(|e| ExtentRaftError::RaftLog(e.to_string()))?;
        info!(partition_id = %partition_id, "partition removed");
        Ok(())
    }

    pub async fn shutdown(&self) {
        for partition_id in self.list() {
            if let Err(e) = self.remove(partition_id).await {
                warn!(partition_id = %partition_id, error = %e, "partition shutdown failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use extentraft_core::ExtentId;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn test_space(temp_dir: &TempDir) -> PartitionSpace {
        let config = NodeConfig {
            node_id: 1,
            cluster_id: "test".to_string(),
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        PartitionSpace::new(config).unwrap()
    }

    pub(crate) fn single_replica(partition_id: u64) -> CreatePartitionRequest {
        CreatePartitionRequest {
            partition_id,
            replicas: vec![ReplicaSpec {
                node_id: 1,
                addr: "127.0.0.1:17310".to_string(),
            }],
            capacity_bytes: Some(1 << 20),
        }
    }

    pub(crate) async fn wait_for_leader(handle: &PartitionHandle) {
        handle
            .raft()
            .wait(Some(Duration::from_secs(5)))
            .current_leader(1, "single replica elects itself")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_get_list_remove() {
        let temp_dir = TempDir::new().unwrap();
        let space = test_space(&temp_dir);

        let handle = space.create(single_replica(3)).await.unwrap();
        wait_for_leader(&handle).await;
        space.create(single_replica(1)).await.unwrap();

        assert_eq!(space.list(), vec![PartitionId::new(1), PartitionId::new(3)]);
        assert_eq!(space.get(PartitionId::new(3)).unwrap().partition.capacity(), 1 << 20);
        assert!(matches!(
            space.create(single_replica(3)).await,
            Err(ExtentRaftError::PartitionExists(_))
        ));

        space.remove(PartitionId::new(3)).await.unwrap();
        assert!(matches!(
            space.get(PartitionId::new(3)),
            Err(ExtentRaftError::PartitionNotFound(_))
        ));
        space.shutdown().await;
        assert!(space.list().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_partition() {
        let temp_dir = TempDir::new().unwrap();
        let space = test_space(&temp_dir);

        let mut request = single_replica(5);
        request.replicas[0].node_id = 2;
        assert!(matches!(
            space.create(request).await,
            Err(ExtentRaftError::Config(_))
        ));
        assert!(space.list().is_empty());
    }

    #[tokio::test]
    async fn test_random_write_through_raft() {
        let temp_dir = TempDir::new().unwrap();
        let space = test_space(&temp_dir);
        let handle = space.create(single_replica(1)).await.unwrap();
        wait_for_leader(&handle).await;

        let extent_id = ExtentId::new(5);
        handle.store.create_extent_with_id(extent_id).unwrap();
        let code = handle
            .partition
            .random_write_submit(extentraft_raft::WriteRequest {
                opcode: 0x12,
                extent_id: extent_id.0,
                offset: 4,
                size: 3,
                data: vec![7, 8, 9],
                checksum: 1,
            })
            .await
            .unwrap();

        assert_eq!(code, extentraft_core::ResultCode::Ok);
        assert_eq!(handle.store.read(extent_id, 4, 3).unwrap(), vec![7, 8, 9]);
        assert_eq!(handle.store.sync_writes(extent_id).unwrap(), 1);
        assert!(handle.partition.applied_position() > 0);
        assert!(handle.partition.check_leader().await.is_ok());
        space.shutdown().await;
    }
}
