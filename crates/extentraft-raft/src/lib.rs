//! extentraft raft - replicated random writes for data partitions
//!
//! - `command`: binary random-write frame codec
//! - `apply`: state machine applying committed writes to the extent store
//! - `snapshot`: applied-position snapshot records
//! - `alarm`: operator alarms for durable apply failures
//! - `log`: replicated log seam, backed by openraft
//! - `local`: in-process replicated log
//! - `partition`: submission path and leader gate
//! - `types`, `storage`, `state_machine`, `network`: openraft integration

pub mod alarm;
pub mod apply;
pub mod command;
pub mod local;
pub mod log;
pub mod network;
pub mod partition;
pub mod snapshot;
pub mod state_machine;
pub mod storage;
pub mod types;

pub use alarm::{apply_alarm_key, AlarmHandle, AlarmSink, TracingAlarm};
pub use apply::{AckCode, AppliedPosition, RandomWriteApplier};
pub use command::{WriteCommand, WriteOpcode};
pub use local::LocalLog;
pub use log::{OpenRaftLog, PartitionRaft, ReplicatedLog};
pub use network::{HttpRaftNetwork, HttpRaftNetworkFactory};
pub use partition::{DataPartition, PartitionState, PartitionStatus, WriteRequest};
pub use state_machine::PartitionStateMachine;
pub use storage::{open_log_db, RocksDbLogStorage};
pub use types::*;

use extentraft_core::{ExtentRaftError, RaftConfig};
use openraft::{Raft, SnapshotPolicy};
use std::sync::Arc;

/// Translate node raft settings into an openraft config for one partition
pub fn openraft_config(cluster_name: &str, config: &RaftConfig) -> Result<openraft::Config, ExtentRaftError> {
    openraft::Config {
        cluster_name: cluster_name.to_string(),
        heartbeat_interval: config.heartbeat_interval.as_millis() as u64,
        election_timeout_min: config.election_timeout_min.as_millis() as u64,
        election_timeout_max: config.election_timeout_max.as_millis() as u64,
        install_snapshot_timeout: config.rpc_timeout.as_millis() as u64,
        max_payload_entries: config.max_append_entries,
        snapshot_policy: SnapshotPolicy::LogsSinceLast(config.snapshot_logs_since_last),
        snapshot_max_chunk_size: config.snapshot_chunk_size,
        ..Default::default()
    }
    .validate()
    .map_err(|e| ExtentRaftError::Config(e.to_string()))
}

/// Create a new Raft instance for one partition
pub async fn create_raft(
    node_id: RaftNodeId,
    config: openraft::Config,
    network: HttpRaftNetworkFactory,
    log_storage: Arc<RocksDbLogStorage>,
    state_machine: Arc<PartitionStateMachine>,
) -> Result<PartitionRaft, ExtentRaftError> {
    Raft::new(node_id, Arc::new(config), network, log_storage, state_machine)
        .await
        .map_err(|e| ExtentRaftError::RaftLog(e.to_string()))
}
