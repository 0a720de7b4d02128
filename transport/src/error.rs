use std::fmt::{Display, Formatter};
use std::io;

use crate::envelope::NodeId;

#[derive(Debug)]
pub enum TransportError {
    /// No reply arrived by the caller's deadline.
    Timeout,
    /// The peer has failed to connect and is presenting as persistently unreachable.
    Unreachable(NodeId),
    /// The peer is not known to this transport's peer list.
    UnknownPeer(NodeId),
    Io(io::Error),
    Encoding(bincode::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "RPC timed out before a reply arrived"),
            Self::Unreachable(id) => write!(f, "peer {} is unreachable", id),
            Self::UnknownPeer(id) => write!(f, "no peer registered with id {}", id),
            Self::Io(err) => write!(f, "{}", err),
            Self::Encoding(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        Self::Encoding(err)
    }
}
