//! HTTP-based Raft network implementation
//!
//! Each partition runs its own raft group, so every RPC is addressed to
//! `/raft/{partition_id}/{rpc}` on the target replica's node.

use crate::types::{PartitionTypeConfig, RaftNodeId, ReplicaNode};
use extentraft_core::{ExtentRaftError, PartitionId};
use openraft::error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// HTTP network factory for one partition's raft group
pub struct HttpRaftNetworkFactory {
    client: Client,
    partition_id: PartitionId,
}

impl HttpRaftNetworkFactory {
    pub fn new(partition_id: PartitionId, timeout: Duration) -> Result<Self, ExtentRaftError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtentRaftError::Config(format!("http client: {}", e)))?;

        Ok(Self { client, partition_id })
    }
}

impl RaftNetworkFactory<PartitionTypeConfig> for HttpRaftNetworkFactory {
    type Network = HttpRaftNetwork;

    async fn new_client(&mut self, target: RaftNodeId, node: &ReplicaNode) -> Self::Network {
        HttpRaftNetwork {
            client: self.client.clone(),
            partition_id: self.partition_id,
            target,
            target_addr: node.addr.clone(),
        }
    }
}

/// Connection to one peer replica
pub struct HttpRaftNetwork {
    client: Client,

    partition_id: PartitionId,

    /// Target node ID
    target: RaftNodeId,

    /// Target node address
    target_addr: String,
}

impl HttpRaftNetwork {
    fn url(&self, rpc: &str) -> String {
        format!("http://{}/raft/{}/{}", self.target_addr, self.partition_id.0, rpc)
    }

    /// POST an RPC; the peer answers with a serialized `Result<Resp, E>`
    async fn post<Req, Resp, E>(
        &self,
        rpc: &str,
        request: &Req,
    ) -> Result<Resp, RPCError<RaftNodeId, ReplicaNode, E>>
    where
        Req: Serialize + Send + Sync,
        Resp: DeserializeOwned,
        E: std::error::Error + DeserializeOwned,
    {
        let url = self.url(rpc);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(url = %url, status = %status, "raft rpc rejected");
            return Err(RPCError::Network(NetworkError::new(&std::io::Error::other(format!(
                "HTTP {}: {}",
                status, text
            )))));
        }

        let result: Result<Resp, E> = response
            .json()
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;

        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<PartitionTypeConfig> for HttpRaftNetwork {
    async fn append_entries(
        &mut self,
        request: AppendEntriesRequest<PartitionTypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<RaftNodeId>, RPCError<RaftNodeId, ReplicaNode, RaftError<RaftNodeId>>> {
        self.post("append_entries", &request).await
    }

    async fn install_snapshot(
        &mut self,
        request: InstallSnapshotRequest<PartitionTypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<RaftNodeId>,
        RPCError<RaftNodeId, ReplicaNode, RaftError<RaftNodeId, InstallSnapshotError>>,
    > {
        self.post("install_snapshot", &request).await
    }

    async fn vote(
        &mut self,
        request: VoteRequest<RaftNodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<RaftNodeId>, RPCError<RaftNodeId, ReplicaNode, RaftError<RaftNodeId>>> {
        self.post("vote", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_targets_partition_route() {
        let mut factory = HttpRaftNetworkFactory::new(PartitionId::new(12), Duration::from_millis(500)).unwrap();
        let client = factory.new_client(3, &ReplicaNode::new("10.0.0.3:17310")).await;

        assert_eq!(client.target, 3);
        assert_eq!(client.url("vote"), "http://10.0.0.3:17310/raft/12/vote");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_network_error() {
        let mut factory = HttpRaftNetworkFactory::new(PartitionId::new(1), Duration::from_millis(200)).unwrap();
        // Port 9 (discard) on localhost is not served
        let mut client = factory.new_client(2, &ReplicaNode::new("127.0.0.1:9")).await;

        let request = VoteRequest::new(openraft::Vote::new(1, 1), None);
        let err = client
            .vote(request, RPCOption::new(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, RPCError::Network(_)));
    }
}
