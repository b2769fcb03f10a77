//! DualWrite - Dual-replica PostgreSQL write coordinator
//!
//! Sends every mutating statement to two independent PostgreSQL replicas,
//! each in its own transaction, and binds the acting user into that
//! transaction so a database trigger can record who changed what.
//!
//! # Architecture
//!
//! There is no leader and no log: the two replicas are peers. A
//! [`replica::ReplicaScope`] holds one connection per replica for a unit of
//! work; the [`coordinator::DualWriter`] runs begin, actor binding, the
//! statements and commit on each replica and reports a per-replica outcome
//! together with an aggregate success flag derived from the configured
//! consistency policy.
//!
//! # Features
//!
//! - Concurrent or sequential fan-out with per-step timeouts
//! - Transaction-local actor binding for the audit trigger
//! - Audit trigger installation, browsing and statistics
//! - Budget ("despesas") replace and update use cases
//! - HTTP API and operator CLIs

pub mod api;
pub mod audit;
pub mod budget;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod replica;

pub use config::DualWriteConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{ActorId, AuditFilter, AuditRecord};
    pub use crate::budget::{BudgetService, ReplaceOutcome, ReplaceRequest};
    pub use crate::config::DualWriteConfig;
    pub use crate::coordinator::{ConsistencyMode, DualWriteResult, DualWriter, UnitOfWork, WriteStatement};
    pub use crate::error::{Error, Result};
    pub use crate::replica::{PgConnector, ReplicaConnector, ReplicaName, ReplicaScope};
}
