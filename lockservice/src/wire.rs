//! Conversions between `raft`'s internal message types and `transport`'s serde-friendly wire
//! mirrors. `raft` is `no_std` and encodes with `prost` when that feature is on; peer RPCs here go
//! over `transport`'s bincode envelopes instead, so every Raft message is translated at the edge.

use bytes::Bytes;
use raft::message::{
    AppendRequest, AppendResponse, LogEntry, LogIndex, Message, Rpc, TermId, VoteRequest,
    VoteResponse,
};
use transport::{
    AppendRequestWire, AppendResponseWire, LogEntryWire, LogIndexWire, RpcPayload, TermWire,
    VoteRequestWire, VoteResponseWire,
};

fn term_to_wire(term: TermId) -> TermWire {
    TermWire { id: term.id }
}

fn term_from_wire(wire: TermWire) -> TermId {
    TermId { id: wire.id }
}

fn index_to_wire(index: LogIndex) -> LogIndexWire {
    LogIndexWire { id: index.id }
}

fn index_from_wire(wire: LogIndexWire) -> LogIndex {
    LogIndex { id: wire.id }
}

fn entry_to_wire(entry: &LogEntry) -> LogEntryWire {
    LogEntryWire {
        term: term_to_wire(entry.term),
        data: entry.data.to_vec(),
    }
}

fn entry_from_wire(wire: LogEntryWire) -> LogEntry {
    LogEntry {
        term: term_from_wire(wire.term),
        data: Bytes::from(wire.data),
    }
}

/// Converts an outgoing Raft [`Message`] to the [`RpcPayload`] sent over `transport`.
pub fn message_to_payload(message: &Message) -> Option<RpcPayload> {
    let term = term_to_wire(message.term);
    match message.rpc.as_ref()? {
        Rpc::VoteRequest(req) => Some(RpcPayload::RequestVote(VoteRequestWire {
            term,
            last_log_idx: index_to_wire(req.last_log_idx),
            last_log_term: term_to_wire(req.last_log_term),
        })),
        Rpc::VoteResponse(resp) => Some(RpcPayload::VoteResponse(VoteResponseWire {
            term,
            vote_granted: resp.vote_granted,
        })),
        Rpc::AppendRequest(req) => Some(RpcPayload::AppendEntries(AppendRequestWire {
            term,
            prev_log_idx: index_to_wire(req.prev_log_idx),
            prev_log_term: term_to_wire(req.prev_log_term),
            leader_commit: index_to_wire(req.leader_commit),
            entries: req.entries.iter().map(entry_to_wire).collect(),
        })),
        Rpc::AppendResponse(resp) => Some(RpcPayload::AppendResponse(AppendResponseWire {
            term,
            success: resp.success,
            match_idx: index_to_wire(resp.match_idx),
            last_log_idx: index_to_wire(resp.last_log_idx),
        })),
    }
}

/// Converts an incoming [`RpcPayload`] back into a Raft [`Message`], if it's a Raft payload at
/// all (lock/queue/cache forwarding payloads return `None`).
pub fn payload_to_message(payload: &RpcPayload) -> Option<Message> {
    match payload {
        RpcPayload::RequestVote(wire) => Some(Message {
            term: term_from_wire(wire.term),
            rpc: Some(Rpc::VoteRequest(VoteRequest {
                last_log_idx: index_from_wire(wire.last_log_idx),
                last_log_term: term_from_wire(wire.last_log_term),
            })),
        }),
        RpcPayload::VoteResponse(wire) => Some(Message {
            term: term_from_wire(wire.term),
            rpc: Some(Rpc::VoteResponse(VoteResponse {
                vote_granted: wire.vote_granted,
            })),
        }),
        RpcPayload::AppendEntries(wire) => Some(Message {
            term: term_from_wire(wire.term),
            rpc: Some(Rpc::AppendRequest(AppendRequest {
                prev_log_idx: index_from_wire(wire.prev_log_idx),
                prev_log_term: term_from_wire(wire.prev_log_term),
                leader_commit: index_from_wire(wire.leader_commit),
                entries: wire.entries.iter().cloned().map(entry_from_wire).collect(),
            })),
        }),
        RpcPayload::AppendResponse(wire) => Some(Message {
            term: term_from_wire(wire.term),
            rpc: Some(Rpc::AppendResponse(AppendResponse {
                success: wire.success,
                match_idx: index_from_wire(wire.match_idx),
                last_log_idx: index_from_wire(wire.last_log_idx),
            })),
        }),
        _ => None,
    }
}
