//! Consistent-hash routed message queue with WAL-backed durability and at-least-once
//! delivery (§4.6). Does not use Raft: durability is local, distribution is by hash routing.

mod engine;
mod error;
mod message;
mod ring;
mod state;
mod wal;

pub use engine::{QueueEngine, QueueEngineConfig};
pub use error::QueueError;
pub use message::{QueueMessage, WalRecord};
pub use ring::HashRing;
