//! Raft type definitions for OpenRaft integration

use crate::apply::AckCode;
use extentraft_core::PartitionId;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// OpenRaft node id (the data node's id)
pub type RaftNodeId = u64;

/// Replica of a partition: the data node hosting it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReplicaNode {
    /// HTTP address of the hosting data node
    pub addr: String,
}

impl ReplicaNode {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl std::fmt::Display for ReplicaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Type configuration shared by every partition's raft group
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Ord, PartialOrd)]
pub struct PartitionTypeConfig;

impl openraft::RaftTypeConfig for PartitionTypeConfig {
    /// Log payload: an encoded random-write frame
    type D = PartitionRequest;

    /// Result of applying a payload
    type R = PartitionResponse;

    type NodeId = RaftNodeId;

    type Node = ReplicaNode;

    type Entry = openraft::Entry<Self>;

    /// Snapshot payload: applied position records
    type SnapshotData = Cursor<Vec<u8>>;

    type AsyncRuntime = openraft::TokioRuntime;

    type Responder = openraft::impls::OneshotResponder<Self>;
}

/// Entry payload replicated through a partition's log
///
/// The frame stays opaque until apply so that an undecodable entry is
/// handled by the state machine instead of the transport.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionRequest {
    pub partition_id: PartitionId,
    pub frame: Vec<u8>,
}

/// Response returned to the proposer once the entry is applied
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionResponse {
    pub ack: AckCode,
}

impl PartitionResponse {
    pub fn ok() -> Self {
        Self { ack: AckCode::Ok }
    }
}
