//! Coordinator Module
//!
//! The dual-replica write coordinator. Every mutating statement is sent,
//! byte for byte, to both replicas; each replica commits or rolls back on
//! its own and the caller gets a [`DualWriteResult`] describing both.

mod outcome;
mod statement;
mod writer;

pub use crate::config::{ConsistencyMode, FanOut};
pub use outcome::{DualWriteResult, ReplicaOutcome, ReplicationStatus};
pub use statement::{SqlValue, StatementKind, WriteStatement};
pub use writer::{DualWriter, UnitOfWork};
