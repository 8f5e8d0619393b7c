//! HTTP surface: partition admin, client writes and raft RPC

use crate::space::{CreatePartitionRequest, PartitionSpace};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use extentraft_core::{CommandError, ExtentRaftError, ExtentId, NodeId, PartitionId, ResultCode};
use extentraft_raft::{PartitionStatus, PartitionTypeConfig, RaftNodeId, WriteRequest};
use openraft::error::{InstallSnapshotError, RaftError};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::RaftMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<PartitionSpace>;

/// Error returned by handlers, mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(ExtentRaftError);

impl From<ExtentRaftError> for ApiError {
    fn from(err: ExtentRaftError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ExtentRaftError::NotLeader { .. } => StatusCode::MISDIRECTED_REQUEST,
            ExtentRaftError::PartitionNotFound(_) => StatusCode::NOT_FOUND,
            ExtentRaftError::PartitionExists(_) => StatusCode::CONFLICT,
            ExtentRaftError::Command(_) | ExtentRaftError::Config(_) => StatusCode::BAD_REQUEST,
            ExtentRaftError::LogSubmit(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    /// Set on leadership rejections so the caller can redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<NodeId>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let leader = match &self.0 {
            ExtentRaftError::NotLeader { leader } => *leader,
            _ => None,
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            code: status.as_u16(),
            leader,
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub result: ResultCode,
    pub result_code: u8,
}

/// Extent creation; the cluster manager picks the ID and sends it to every replica
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateExtentRequest {
    pub extent_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtentResponse {
    pub extent_id: ExtentId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderResponse {
    pub partition_id: PartitionId,
    pub node_id: NodeId,
}

pub fn router(space: AppState) -> Router {
    Router::new()
        .route("/partitions", get(list_partitions))
        .route("/partition", post(create_partition))
        .route("/partition/:id", get(partition_status).delete(remove_partition))
        .route("/partition/:id/extent", post(create_extent))
        .route("/partition/:id/random_write", post(random_write))
        .route("/partition/:id/check_leader", get(check_leader))
        .route("/raft/:id/status", get(raft_status))
        .route("/raft/:id/append_entries", post(append_entries))
        .route("/raft/:id/vote", post(vote))
        .route("/raft/:id/install_snapshot", post(install_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(space)
}

async fn list_partitions(State(space): State<AppState>) -> ApiResult<Vec<PartitionStatus>> {
    let mut statuses = Vec::new();
    for partition_id in space.list() {
        // Removed concurrently
        if let Ok(handle) = space.get(partition_id) {
            statuses.push(handle.partition.status().await);
        }
    }
    Ok(Json(statuses))
}

async fn create_partition(
    State(space): State<AppState>,
    Json(request): Json<CreatePartitionRequest>,
) -> Result<(StatusCode, Json<PartitionStatus>), ApiError> {
    let handle = space.create(request).await?;
    Ok((StatusCode::CREATED, Json(handle.partition.status().await)))
}

async fn partition_status(State(space): State<AppState>, Path(id): Path<u64>) -> ApiResult<PartitionStatus> {
    let handle = space.get(PartitionId::new(id))?;
    Ok(Json(handle.partition.status().await))
}

async fn remove_partition(State(space): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    space.remove(PartitionId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create an extent on the local replica under the requested ID
async fn create_extent(
    State(space): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CreateExtentRequest>,
) -> ApiResult<ExtentResponse> {
    let handle = space.get(PartitionId::new(id))?;
    let extent_id = ExtentId::new(request.extent_id);
    if !extent_id.is_valid() {
        return Err(ExtentRaftError::from(CommandError::InvalidExtent(extent_id.0)).into());
    }
    handle
        .store
        .create_extent_with_id(extent_id)
        .map_err(|e| ExtentRaftError::Storage(e.to_string()))?;
    Ok(Json(ExtentResponse { extent_id }))
}

async fn random_write(
    State(space): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<WriteRequest>,
) -> ApiResult<WriteResponse> {
    let handle = space.get(PartitionId::new(id))?;
    let result = handle.partition.random_write_submit(request).await?;
    Ok(Json(WriteResponse {
        result,
        result_code: result.as_u8(),
    }))
}

async fn check_leader(State(space): State<AppState>, Path(id): Path<u64>) -> ApiResult<LeaderResponse> {
    let handle = space.get(PartitionId::new(id))?;
    handle.partition.check_leader().await?;
    Ok(Json(LeaderResponse {
        partition_id: handle.partition.partition_id(),
        node_id: space.node_id(),
    }))
}

async fn raft_status(
    State(space): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<RaftMetrics<RaftNodeId, extentraft_raft::ReplicaNode>> {
    let handle = space.get(PartitionId::new(id))?;
    let metrics = handle.raft().metrics().borrow().clone();
    Ok(Json(metrics))
}

async fn append_entries(
    State(space): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AppendEntriesRequest<PartitionTypeConfig>>,
) -> ApiResult<Result<AppendEntriesResponse<RaftNodeId>, RaftError<RaftNodeId>>> {
    let handle = space.get(PartitionId::new(id))?;
    Ok(Json(handle.raft().append_entries(request).await))
}

async fn vote(
    State(space): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<VoteRequest<RaftNodeId>>,
) -> ApiResult<Result<VoteResponse<RaftNodeId>, RaftError<RaftNodeId>>> {
    let handle = space.get(PartitionId::new(id))?;
    Ok(Json(handle.raft().vote(request).await))
}

async fn install_snapshot(
    State(space): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<InstallSnapshotRequest<PartitionTypeConfig>>,
) -> ApiResult<Result<InstallSnapshotResponse<RaftNodeId>, RaftError<RaftNodeId, InstallSnapshotError>>> {
    let handle = space.get(PartitionId::new(id))?;
    Ok(Json(handle.raft().install_snapshot(request).await))
}
