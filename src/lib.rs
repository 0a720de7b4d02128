//! A distributed coordination ensemble: each process hosts one of a Raft-backed lock manager, a
//! consistent-hash routed message queue, or a MESI-coherent cache, and speaks to same-role peers
//! over `transport`.

pub mod config;
pub mod error;
pub mod node;

pub use config::Config;
pub use error::NodeError;
pub use node::{Node, NodeStatus};
