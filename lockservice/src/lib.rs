//! Raft-backed distributed lock manager with deadlock detection (§4.5).

mod command;
mod deadlock;
mod engine;
mod error;
mod table;
mod wait_queue;
mod wire;

pub use command::{LockCommand, LockMode};
pub use engine::{AcquireOutcome, GrantEvent, LockEngine, LockEngineConfig};
pub use error::LockError;
pub use table::{Applied, LockEntry, LockTable};
pub use wait_queue::{LockRequest, WaitQueues};
