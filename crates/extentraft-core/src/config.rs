//! Configuration types for extentraft

use crate::error::{ExtentRaftError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a data node
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique node identifier (also the raft node id of every local replica)
    pub node_id: u64,

    /// Cluster name, used to key operational alarms
    pub cluster_id: String,

    /// Address serving admin and raft RPC requests
    pub listen_addr: SocketAddr,

    /// Data directory for persistent storage
    pub data_dir: PathBuf,

    /// Raft configuration shared by all partitions on this node
    pub raft: RaftConfig,

    /// Data partition configuration
    pub partition: PartitionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            cluster_id: "extentraft".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 17310)),
            data_dir: PathBuf::from("./data"),
            raft: RaftConfig::default(),
            partition: PartitionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)
            .map_err(|e| ExtentRaftError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), node_id = config.node_id, "loaded node config");
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.raft.validate()?;
        self.partition.validate()
    }
}

/// Raft consensus configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Heartbeat interval
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Minimum election timeout
    #[serde(with = "duration_millis")]
    pub election_timeout_min: Duration,

    /// Maximum election timeout
    #[serde(with = "duration_millis")]
    pub election_timeout_max: Duration,

    /// Maximum entries per AppendEntries RPC
    pub max_append_entries: u64,

    /// Snapshot chunk size for transfer
    pub snapshot_chunk_size: u64,

    /// Applied entries since the last snapshot before building a new one
    pub snapshot_logs_since_last: u64,

    /// Timeout of a single raft RPC between replicas
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(100),
            election_timeout_min: Duration::from_millis(300),
            election_timeout_max: Duration::from_millis(500),
            max_append_entries: 100,
            snapshot_chunk_size: 1024 * 1024, // 1MB
            snapshot_logs_since_last: 10000,
            rpc_timeout: Duration::from_millis(3000),
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ExtentRaftError::Config(
                "election_timeout_min must be below election_timeout_max".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ExtentRaftError::Config(
                "heartbeat_interval must be below election_timeout_min".to_string(),
            ));
        }
        Ok(())
    }
}

/// Data partition configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Attempts made against the extent store before an apply is a durable failure
    pub max_write_attempts: u32,

    /// Minimum interval between two alarms with the same key
    #[serde(with = "duration_secs")]
    pub alarm_interval: Duration,

    /// Capacity reported for each partition
    pub capacity_bytes: u64,

    /// Largest size a random write may grow an extent to
    pub max_extent_size: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 20,
            alarm_interval: Duration::from_secs(60),
            capacity_bytes: 120 * 1024 * 1024 * 1024, // 120GB
            max_extent_size: 128 * 1024 * 1024,        // 128MB
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_write_attempts == 0 {
            return Err(ExtentRaftError::Config(
                "max_write_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_extent_size == 0 {
            return Err(ExtentRaftError::Config(
                "max_extent_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// Serde helpers for Duration
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition.max_write_attempts, 20);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NodeConfig = serde_json::from_str(
            r#"{"node_id": 3, "cluster_id": "c1", "partition": {"alarm_interval": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, 3);
        assert_eq!(config.cluster_id, "c1");
        assert_eq!(config.partition.alarm_interval, Duration::from_secs(5));
        assert_eq!(config.partition.max_write_attempts, 20);
        assert_eq!(config.raft.heartbeat_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{"node_id": 9, "listen_addr": "0.0.0.0:9000"}"#).unwrap();

        let config = NodeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.node_id, 9);
        assert_eq!(config.listen_addr.port(), 9000);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            NodeConfig::from_json_file(&path),
            Err(ExtentRaftError::Config(_))
        ));
    }

    #[test]
    fn test_zero_write_attempts_rejected() {
        let config = PartitionConfig {
            max_write_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExtentRaftError::Config(_))));
    }

    #[test]
    fn test_zero_max_extent_size_rejected() {
        let config = PartitionConfig {
            max_extent_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ExtentRaftError::Config(_))));
        assert_eq!(PartitionConfig::default().max_extent_size, 128 * 1024 * 1024);
    }

    #[test]
    fn test_election_window_must_be_ordered() {
        let config = RaftConfig {
            election_timeout_min: Duration::from_millis(500),
            election_timeout_max: Duration::from_millis(300),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
