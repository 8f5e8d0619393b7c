//! Raft state machine for a data partition
//!
//! Bridges openraft's apply/snapshot hooks to the random-write applier.
//! openraft drives `apply` from a single task per raft group, which gives
//! the one-at-a-time, in-order guarantee the applier relies on.

use crate::apply::RandomWriteApplier;
use crate::snapshot::payload_records;
use crate::types::{
    PartitionRequest, PartitionResponse, PartitionTypeConfig, RaftNodeId, ReplicaNode,
};
use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{
    Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, SnapshotMeta, StorageError,
    StoredMembership,
};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Partition state machine
pub struct PartitionStateMachine {
    /// Random-write applier owning the applied position
    applier: Arc<RandomWriteApplier>,

    /// Last log id handed to this state machine
    last_applied_log: RwLock<Option<LogId<RaftNodeId>>>,

    /// Current membership configuration
    membership: RwLock<StoredMembership<RaftNodeId, ReplicaNode>>,
}

impl PartitionStateMachine {
    pub fn new(applier: Arc<RandomWriteApplier>) -> Self {
        Self {
            applier,
            last_applied_log: RwLock::new(None),
            membership: RwLock::new(StoredMembership::default()),
        }
    }

    pub fn applier(&self) -> &Arc<RandomWriteApplier> {
        &self.applier
    }

    async fn apply_request(
        &self,
        log_id: LogId<RaftNodeId>,
        request: PartitionRequest,
    ) -> Result<PartitionResponse, StorageError<RaftNodeId>> {
        // The store write may block on I/O
        let applier = self.applier.clone();
        let position = log_id.index;
        let ack = tokio::task::spawn_blocking(move || {
            applier.apply_tagged(request.partition_id, &request.frame, position)
        })
        .await
        .map_err(|e| {
            StorageError::from_io_error(
                ErrorSubject::StateMachine,
                ErrorVerb::Write,
                std::io::Error::other(e),
            )
        })?;

        Ok(PartitionResponse { ack })
    }
}

impl RaftSnapshotBuilder<PartitionTypeConfig> for Arc<PartitionStateMachine> {
    async fn build_snapshot(
        &mut self,
    ) -> Result<Snapshot<PartitionTypeConfig>, StorageError<RaftNodeId>> {
        let last_applied_log = *self.last_applied_log.read().await;
        let membership = self.membership.read().await.clone();

        let mut records = self.applier.snapshot_iter();
        let applied_position = records.position();
        let data = records.by_ref().flat_map(|r| r.to_vec()).collect::<Vec<u8>>();
        records.close();

        let snapshot_id = format!(
            "{}-{}-{}",
            self.applier.partition_id(),
            last_applied_log.map(|l| l.index).unwrap_or(0),
            chrono::Utc::now().timestamp()
        );

        debug!(
            partition_id = %self.applier.partition_id(),
            applied_position,
            snapshot_id = %snapshot_id,
            "built partition snapshot"
        );

        Ok(Snapshot {
            meta: SnapshotMeta {
                last_log_id: last_applied_log,
                last_membership: membership,
                snapshot_id,
            },
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<PartitionTypeConfig> for Arc<PartitionStateMachine> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<
        (
            Option<LogId<RaftNodeId>>,
            StoredMembership<RaftNodeId, ReplicaNode>,
        ),
        StorageError<RaftNodeId>,
    > {
        let last_applied = *self.last_applied_log.read().await;
        let membership = self.membership.read().await.clone();
        Ok((last_applied, membership))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<PartitionResponse>, StorageError<RaftNodeId>>
    where
        I: IntoIterator<Item = Entry<PartitionTypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut responses = Vec::new();

        for entry in entries {
            let log_id = entry.log_id;

            let response = match entry.payload {
                EntryPayload::Blank => {
                    self.applier.upload_applied_position(log_id.index);
                    PartitionResponse::ok()
                }
                EntryPayload::Normal(request) => self.apply_request(log_id, request).await?,
                EntryPayload::Membership(membership) => {
                    *self.membership.write().await =
                        StoredMembership::new(Some(log_id), membership);
                    self.applier.upload_applied_position(log_id.index);
                    PartitionResponse::ok()
                }
            };

            *self.last_applied_log.write().await = Some(log_id);
            responses.push(response);
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<RaftNodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<RaftNodeId, ReplicaNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<RaftNodeId>> {
        let data = snapshot.into_inner();
        let position = self
            .applier
            .restore(payload_records(&data))
            .map_err(|e| {
                StorageError::from_io_error(
                    ErrorSubject::Snapshot(Some(meta.signature())),
                    ErrorVerb::Read,
                    std::io::Error::other(e),
                )
            })?;

        *self.last_applied_log.write().await = meta.last_log_id;
        *self.membership.write().await = meta.last_membership.clone();

        debug!(
            partition_id = %self.applier.partition_id(),
            applied_position = position,
            snapshot_id = %meta.snapshot_id,
            "installed partition snapshot"
        );
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<PartitionTypeConfig>>, StorageError<RaftNodeId>> {
        if self.last_applied_log.read().await.is_none() {
            return Ok(None);
        }
        let mut builder = self.clone();
        let snapshot = builder.build_snapshot().await?;
        Ok(Some(snapshot))
    }
}
