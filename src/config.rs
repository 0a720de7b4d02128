//! Configuration loading (§6 "Configuration"). Options are read from a TOML file and may be
//! overridden by `ENSEMBLE_`-prefixed environment variables.

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use transport::{NodeId, Peer};

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Missing(&'static str),
    InvalidPeer(String),
    InvalidRole(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read config file: {}", err),
            Self::Parse(err) => write!(f, "invalid config: {}", err),
            Self::Missing(field) => write!(f, "missing required config field: {}", field),
            Self::InvalidPeer(raw) => write!(f, "invalid peer entry '{}', expected id:host:port", raw),
            Self::InvalidRole(raw) => write!(f, "invalid role '{}', expected lock|queue|cache", raw),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lock,
    Queue,
    Cache,
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(Self::Lock),
            "queue" => Ok(Self::Queue),
            "cache" => Ok(Self::Cache),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

fn default_election_timeout_min_ms() -> u64 {
    150
}
fn default_election_timeout_max_ms() -> u64 {
    300
}
fn default_heartbeat_ms() -> u64 {
    50
}
fn default_cache_capacity() -> usize {
    100
}
fn default_queue_visibility_timeout_ms() -> u64 {
    30_000
}
fn default_consistent_hash_virtual_nodes() -> usize {
    150
}
fn default_data_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    node_id: String,
    listen_addr: String,
    peers: Vec<String>,
    role: String,
    #[serde(default = "default_election_timeout_min_ms")]
    election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    heartbeat_ms: u64,
    #[serde(default = "default_cache_capacity")]
    cache_capacity: usize,
    #[serde(default = "default_queue_visibility_timeout_ms")]
    queue_visibility_timeout_ms: u64,
    #[serde(default)]
    wal_path: Option<String>,
    #[serde(default = "default_consistent_hash_virtual_nodes")]
    consistent_hash_virtual_nodes: usize,
    #[serde(default = "default_data_dir")]
    data_dir: String,
}

/// Resolved, validated node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: NodeId,
    pub listen_addr: String,
    pub peers: Vec<Peer>,
    pub role: Role,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_ms: u64,
    pub cache_capacity: usize,
    pub queue_visibility_timeout_ms: u64,
    pub wal_path: Option<String>,
    pub consistent_hash_virtual_nodes: usize,
    pub data_dir: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let mut raw: RawConfig = toml::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        apply_env_overrides(&mut raw);
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let role: Role = raw.role.parse()?;
        if role == Role::Queue && raw.wal_path.is_none() {
            return Err(ConfigError::Missing("wal_path"));
        }

        let peers = raw
            .peers
            .iter()
            .map(|entry| parse_peer(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            node_id: raw.node_id,
            listen_addr: raw.listen_addr,
            peers,
            role,
            election_timeout_min_ms: raw.election_timeout_min_ms,
            election_timeout_max_ms: raw.election_timeout_max_ms,
            heartbeat_ms: raw.heartbeat_ms,
            cache_capacity: raw.cache_capacity,
            queue_visibility_timeout_ms: raw.queue_visibility_timeout_ms,
            wal_path: raw.wal_path,
            consistent_hash_virtual_nodes: raw.consistent_hash_virtual_nodes,
            data_dir: raw.data_dir,
        })
    }
}

/// Parses a `peers` entry of the form `id:host:port`.
fn parse_peer(raw: &str) -> Result<Peer, ConfigError> {
    let mut parts = raw.splitn(3, ':');
    let id = parts.next().filter(|s| !s.is_empty());
    let host = parts.next().filter(|s| !s.is_empty());
    let port = parts.next().filter(|s| !s.is_empty());
    match (id, host, port) {
        (Some(id), Some(host), Some(port)) => Ok(Peer {
            id: id.to_string(),
            address: format!("{}:{}", host, port),
        }),
        _ => Err(ConfigError::InvalidPeer(raw.to_string())),
    }
}

fn apply_env_overrides(raw: &mut RawConfig) {
    if let Ok(v) = std::env::var("ENSEMBLE_NODE_ID") {
        raw.node_id = v;
    }
    if let Ok(v) = std::env::var("ENSEMBLE_LISTEN_ADDR") {
        raw.listen_addr = v;
    }
    if let Ok(v) = std::env::var("ENSEMBLE_ROLE") {
        raw.role = v;
    }
    if let Ok(v) = std::env::var("ENSEMBLE_PEERS") {
        raw.peers = v.split(',').map(|s| s.to_string()).collect();
    }
    if let Ok(v) = std::env::var("ENSEMBLE_WAL_PATH") {
        raw.wal_path = Some(v);
    }
    if let Ok(v) = std::env::var("ENSEMBLE_DATA_DIR") {
        raw.data_dir = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_peer() {
        let peer = parse_peer("node-b:10.0.0.2:7000").unwrap();
        assert_eq!(peer.id, "node-b");
        assert_eq!(peer.address, "10.0.0.2:7000");
    }

    #[test]
    fn rejects_a_malformed_peer() {
        assert!(parse_peer("node-b").is_err());
    }

    #[test]
    fn queue_role_without_wal_path_is_rejected() {
        let raw = RawConfig {
            node_id: "n1".to_string(),
            listen_addr: "127.0.0.1:7000".to_string(),
            peers: vec![],
            role: "queue".to_string(),
            election_timeout_min_ms: default_election_timeout_min_ms(),
            election_timeout_max_ms: default_election_timeout_max_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            cache_capacity: default_cache_capacity(),
            queue_visibility_timeout_ms: default_queue_visibility_timeout_ms(),
            wal_path: None,
            consistent_hash_virtual_nodes: default_consistent_hash_virtual_nodes(),
            data_dir: default_data_dir(),
        };
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::Missing("wal_path"))));
    }
}
