use std::fmt::{Display, Formatter};

use transport::TransportError;

#[derive(Debug)]
pub enum QueueError {
    /// This node does not own `queue_name`; carries a routing hint when known (§6 `WRONG_NODE`).
    WrongNode(Option<String>),
    Transport(TransportError),
    Storage(String),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongNode(Some(owner)) => write!(f, "wrong node, owner is {}", owner),
            Self::WrongNode(None) => write!(f, "wrong node, owner unknown"),
            Self::Transport(err) => write!(f, "{}", err),
            Self::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<TransportError> for QueueError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
