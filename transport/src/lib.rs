//! Deadline-aware request/response RPC between named peers.
//!
//! This crate implements the transport leaf component shared by all three engine crates: a
//! length-prefixed, bincode-encoded [`Envelope`] sent over a reconnecting TCP connection. It
//! guarantees delivery-or-timeout per call but not ordering across different peers; duplicate
//! delivery is not introduced at this layer.

mod envelope;
mod error;
mod transport;

pub use envelope::{
    AppendRequestWire, AppendResponseWire, CacheStateWire, Envelope, LockModeWire, LockOp,
    LogEntryWire, LogIndexWire, NodeId, QueueOp, RpcPayload, TermWire, VoteRequestWire,
    VoteResponseWire,
};
pub use error::TransportError;
pub use transport::{Peer, Transport};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn unknown_peer_is_rejected_immediately() {
        let transport = Transport::bind(
            "node-a".to_string(),
            "127.0.0.1:0",
            vec![],
        )
        .expect("bind");

        let err = transport
            .call(
                &"node-b".to_string(),
                RpcPayload::Ack,
                Duration::from_millis(50),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[test]
    fn call_round_trips_between_two_bound_transports() {
        let a_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let a_addr = a_listener.local_addr().unwrap();
        drop(a_listener);
        let b_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let b_addr = b_listener.local_addr().unwrap();
        drop(b_listener);

        let a = Transport::bind(
            "node-a".to_string(),
            a_addr,
            vec![Peer {
                id: "node-b".to_string(),
                address: b_addr.to_string(),
            }],
        )
        .expect("bind a");
        let b = Transport::bind(
            "node-b".to_string(),
            b_addr,
            vec![Peer {
                id: "node-a".to_string(),
                address: a_addr.to_string(),
            }],
        )
        .expect("bind b");

        let b_responder = b.clone();
        std::thread::spawn(move || {
            if let Ok(request) = b_responder.inbox().recv_timeout(Duration::from_secs(2)) {
                let _ = b_responder.reply(&request, RpcPayload::Ack);
            }
        });

        let reply = a
            .call(
                &"node-b".to_string(),
                RpcPayload::CacheRead {
                    key: "k".to_string(),
                },
                Duration::from_secs(2),
            )
            .expect("call succeeds");
        assert!(matches!(reply, RpcPayload::Ack));
    }
}
