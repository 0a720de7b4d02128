//! Boots exactly one service role per process and exposes the narrow client surface of §6.

use std::path::Path;
use std::sync::Arc;

use cacheservice::{CacheEngine, CacheEngineConfig};
use lockservice::{LockEngine, LockEngineConfig};
use queueservice::{QueueEngine, QueueEngineConfig};
use transport::Peer;

use crate::config::{Config, Role};
use crate::error::NodeError;

/// A running node, holding exactly the engine for its configured role.
pub enum Node {
    Lock(Arc<LockEngine>),
    Queue(Arc<QueueEngine>),
    Cache(Arc<CacheEngine>),
}

/// `status` (§6): the common operation every role answers, regardless of whether it runs Raft.
/// `term`/`commit_index` are `None` for roles with no replicated log (queue, cache).
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub term: Option<u64>,
    pub commit_index: Option<u64>,
    pub peers: Vec<String>,
    pub partition_detected: bool,
}

impl Node {
    pub fn start(config: &Config) -> Result<Self, NodeError> {
        let peers: Vec<Peer> = config
            .peers
            .iter()
            .map(|p| Peer {
                id: p.id.clone(),
                address: p.address.clone(),
            })
            .collect();

        match config.role {
            Role::Lock => {
                let raft_log_path = Path::new(&config.data_dir).join("raft.log");
                let engine = LockEngine::start(
                    config.node_id.clone(),
                    &config.listen_addr,
                    peers,
                    LockEngineConfig {
                        election_timeout_min_ms: config.election_timeout_min_ms,
                        election_timeout_max_ms: config.election_timeout_max_ms,
                        heartbeat_ms: config.heartbeat_ms,
                        tick_interval_ms: 10,
                        raft_log_path: raft_log_path.to_string_lossy().into_owned(),
                        ..LockEngineConfig::default()
                    },
                )
                .map_err(|err| NodeError::Storage(err.to_string()))?;
                Ok(Self::Lock(engine))
            }
            Role::Queue => {
                let wal_path = config
                    .wal_path
                    .clone()
                    .ok_or(NodeError::Config(crate::config::ConfigError::Missing("wal_path")))?;
                let engine = QueueEngine::start(
                    config.node_id.clone(),
                    &config.listen_addr,
                    peers,
                    QueueEngineConfig {
                        wal_path,
                        visibility_timeout_ms: config.queue_visibility_timeout_ms,
                        virtual_nodes: config.consistent_hash_virtual_nodes,
                        ..QueueEngineConfig::default()
                    },
                )
                .map_err(|err| NodeError::Storage(err.to_string()))?;
                Ok(Self::Queue(engine))
            }
            Role::Cache => {
                let engine = CacheEngine::start(
                    config.node_id.clone(),
                    &config.listen_addr,
                    peers,
                    CacheEngineConfig {
                        capacity: config.cache_capacity,
                        ..CacheEngineConfig::default()
                    },
                )
                .map_err(|err| NodeError::Bootstrap(err.to_string()))?;
                Ok(Self::Cache(engine))
            }
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Self::Lock(_) => "lock",
            Self::Queue(_) => "queue",
            Self::Cache(_) => "cache",
        }
    }

    /// `health` (§6): whether the role-specific engine considers itself up, and leadership for
    /// roles that have one.
    pub fn health(&self) -> (bool, Option<bool>) {
        match self {
            Self::Lock(engine) => (true, Some(engine.is_leader())),
            Self::Queue(_) => (true, None),
            Self::Cache(_) => (true, None),
        }
    }

    /// `status` (§6): distinct from `health` — reports replication progress and whether this node
    /// currently suspects it's partitioned from a quorum of its peers.
    pub fn status(&self) -> NodeStatus {
        match self {
            Self::Lock(engine) => NodeStatus {
                term: Some(engine.term()),
                commit_index: Some(engine.commit_index()),
                peers: engine.peers(),
                partition_detected: engine.partition_detected(),
            },
            Self::Queue(engine) => NodeStatus {
                term: None,
                commit_index: None,
                peers: engine.peers(),
                partition_detected: false,
            },
            Self::Cache(engine) => NodeStatus {
                term: None,
                commit_index: None,
                peers: engine.peers(),
                partition_detected: false,
            },
        }
    }
}
