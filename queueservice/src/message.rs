//! Queue message and WAL record types (§3 "Queue message", §4.3 "WAL record").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub msg_id: String,
    pub queue_name: String,
    pub payload: Vec<u8>,
    pub enqueued_at: u64,
    pub attempt_count: u32,
}

/// Tagged WAL record. The one-byte tag on the wire (`E`/`D`/`A`/`R`) lives in [`crate::wal`];
/// this is the typed, in-memory counterpart used once a record has been decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Enqueue(QueueMessage),
    Dequeue(String),
    Ack(String),
    Redeliver(String),
}

impl WalRecord {
    pub fn tag(&self) -> u8 {
        match self {
            WalRecord::Enqueue(_) => b'E',
            WalRecord::Dequeue(_) => b'D',
            WalRecord::Ack(_) => b'A',
            WalRecord::Redeliver(_) => b'R',
        }
    }
}
