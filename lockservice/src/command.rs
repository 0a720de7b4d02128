//! The tagged union of lock-state mutations replicated through the Raft log.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Whether a holder set already in `existing` mode is compatible with a new request for
    /// `self`, per §4.5's grant rule (`resource absent`, or `mode=SHARED` and `existing=SHARED`).
    pub fn compatible_with(self, existing: LockMode) -> bool {
        matches!((self, existing), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockCommand {
    Acquire {
        resource: String,
        client_id: String,
        mode: LockMode,
        acquired_at: u64,
        /// §3 "Lock entry" `ttl`: milliseconds after which a background sweeper proposes `Expire`
        /// for this holder. `None` means the lock is held until released.
        ttl_ms: Option<u64>,
    },
    Release {
        resource: String,
        client_id: String,
    },
    Expire {
        resource: String,
        client_id: String,
    },
    AbortClient {
        client_id: String,
    },
}

impl LockCommand {
    pub fn encode(&self) -> bytes::Bytes {
        bincode::serialize(self)
            .expect("LockCommand serialization is infallible")
            .into()
    }

    pub fn decode(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
