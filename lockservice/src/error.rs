use std::fmt::{Display, Formatter};

use transport::TransportError;

#[derive(Debug)]
pub enum LockError {
    /// This node is not the Raft leader; carries the leader's id when known.
    NotLeader(Option<String>),
    /// No majority could be reached before the caller's deadline.
    Unavailable,
    /// The propose was not committed before the caller's deadline.
    Timeout,
    Transport(TransportError),
    /// The Raft log rejected the append outright (e.g. storage failure).
    Storage(String),
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLeader(Some(leader)) => write!(f, "not leader, try {}", leader),
            Self::NotLeader(None) => write!(f, "not leader, no known leader"),
            Self::Unavailable => write!(f, "no majority reachable"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Transport(err) => write!(f, "{}", err),
            Self::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for LockError {}

impl From<TransportError> for LockError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
