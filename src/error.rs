//! Top-level error type for the `ensemble-node` binary, mapped to the exit codes in §6.

use std::fmt::{Display, Formatter};

use crate::config::ConfigError;

#[derive(Debug)]
pub enum NodeError {
    Config(ConfigError),
    Storage(String),
    Bootstrap(String),
}

impl NodeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Storage(_) => 2,
            Self::Bootstrap(_) => 3,
        }
    }
}

impl Display for NodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{}", err),
            Self::Storage(err) => write!(f, "storage error: {}", err),
            Self::Bootstrap(err) => write!(f, "failed to bootstrap peers: {}", err),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ConfigError> for NodeError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}
