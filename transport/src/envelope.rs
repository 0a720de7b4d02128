//! The wire envelope exchanged between peers, and the payload types it carries.

use serde::{Deserialize, Serialize};

/// A node identifier, stable for the lifetime of a process (matches the teacher's own choice of
/// `Node<InMemoryLog, OsRng, String>` for its Raft node id).
pub type NodeId = String;

/// An RPC envelope. `kind` is a human-readable tag derived from the payload variant, kept on the
/// wire mainly so logs and traces don't need to decode the payload to say what it was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: u64,
    pub kind: &'static str,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub payload: RpcPayload,
    pub ts: u64,
}

impl Envelope {
    pub fn new(msg_id: u64, sender: NodeId, receiver: NodeId, payload: RpcPayload, ts: u64) -> Self {
        Self {
            msg_id,
            kind: payload.kind(),
            sender,
            receiver,
            payload,
            ts,
        }
    }
}

/// Wire mirror of [`raft::message::TermId`]; the `raft` crate is `no_std` and doesn't derive
/// `serde` impls, so peer RPCs carry this plain mirror instead and `lockservice` converts at the
/// boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermWire {
    pub id: u64,
}

/// Wire mirror of [`raft::message::LogIndex`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogIndexWire {
    pub id: u64,
}

/// Wire mirror of [`raft::message::LogEntry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntryWire {
    pub term: TermWire,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequestWire {
    pub term: TermWire,
    pub last_log_idx: LogIndexWire,
    pub last_log_term: TermWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponseWire {
    pub term: TermWire,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequestWire {
    pub term: TermWire,
    pub prev_log_idx: LogIndexWire,
    pub prev_log_term: TermWire,
    pub leader_commit: LogIndexWire,
    pub entries: Vec<LogEntryWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResponseWire {
    pub term: TermWire,
    pub success: bool,
    pub match_idx: LogIndexWire,
    pub last_log_idx: LogIndexWire,
}

/// A lock-service client operation, carried inside `lock_forward` when a non-leader redirects a
/// client call to the leader it knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockOp {
    Acquire {
        resource: String,
        client_id: String,
        mode: LockModeWire,
        timeout_ms: u64,
        /// §3 "Lock entry" `ttl`, in milliseconds; `None` if the lock is held until released.
        ttl_ms: Option<u64>,
    },
    Release {
        resource: String,
        client_id: String,
    },
    Status {
        resource: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockModeWire {
    Shared,
    Exclusive,
}

/// A queue-service client operation, carried inside `queue_forward` when a non-owner redirects an
/// enqueue to the ring's owner for that queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueOp {
    Enqueue {
        queue_name: String,
        payload: Vec<u8>,
    },
}

/// Every payload that can travel inside an [`Envelope`]. One variant per entry in the peer RPC
/// surface, plus the `LockOp`/`QueueOp` forwarding payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcPayload {
    RequestVote(VoteRequestWire),
    VoteResponse(VoteResponseWire),
    AppendEntries(AppendRequestWire),
    AppendResponse(AppendResponseWire),
    LockForward(LockOp),
    QueueForward(QueueOp),
    /// Reply to a successful `queue_forward` enqueue, carrying the id the owner assigned.
    QueueForwardAck {
        msg_id: String,
    },
    CacheRead {
        key: String,
    },
    CacheReadResponse {
        key: String,
        value: Option<Vec<u8>>,
        state: CacheStateWire,
    },
    CacheInvalidate {
        key: String,
    },
    CacheInvalidateAck {
        key: String,
    },
    /// A generic acknowledgement, used as the reply to payloads that carry no data of their own
    /// (e.g. `cache_invalidate`'s ack, or an error response).
    Ack,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStateWire {
    Modified,
    Exclusive,
    Shared,
    Invalid,
}

impl RpcPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            RpcPayload::RequestVote(_) => "request_vote",
            RpcPayload::VoteResponse(_) => "vote_response",
            RpcPayload::AppendEntries(_) => "append_entries",
            RpcPayload::AppendResponse(_) => "append_response",
            RpcPayload::LockForward(_) => "lock_forward",
            RpcPayload::QueueForward(_) => "queue_forward",
            RpcPayload::QueueForwardAck { .. } => "queue_forward_ack",
            RpcPayload::CacheRead { .. } => "cache_read",
            RpcPayload::CacheReadResponse { .. } => "cache_read_response",
            RpcPayload::CacheInvalidate { .. } => "cache_invalidate",
            RpcPayload::CacheInvalidateAck { .. } => "cache_invalidate_ack",
            RpcPayload::Ack => "ack",
            RpcPayload::Error(_) => "error",
        }
    }
}
