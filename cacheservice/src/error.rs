use std::fmt::{Display, Formatter};

use transport::TransportError;

#[derive(Debug)]
pub enum CacheError {
    Transport(TransportError),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<TransportError> for CacheError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
