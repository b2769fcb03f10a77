//! Replica Module
//!
//! Connections to the two PostgreSQL replicas every write is sent to.
//! A [`ReplicaConnector`] opens connections, a [`ReplicaScope`] owns at most
//! one connection per replica for the duration of a unit of work.

mod postgres;
pub mod memory;
mod scope;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditFilter, AuditRecord, AuditStats};
use crate::budget::{BudgetLine, Term};
use crate::coordinator::WriteStatement;
use crate::error::Result;

pub use memory::{FaultPlan, MemoryCluster, MemoryReplica};
pub use postgres::{PgConnector, PgReplicaConnection};
pub use scope::{ReplicaScope, ReplicaSlot};

/// One of the two named replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaName {
    /// Primary instance, also used for reads
    Local,
    /// Redundant instance
    Secondary,
}

impl ReplicaName {
    /// Both replicas in write order
    pub const ALL: [ReplicaName; 2] = [ReplicaName::Local, ReplicaName::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaName::Local => "local",
            ReplicaName::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ReplicaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplicaName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ReplicaName::Local),
            "secondary" | "railway" => Ok(ReplicaName::Secondary),
            other => Err(crate::Error::Validation(format!(
                "unknown replica '{}'",
                other
            ))),
        }
    }
}

/// Opens connections to replicas
#[async_trait]
pub trait ReplicaConnector: Send + Sync {
    /// Establish a new connection to the named replica
    async fn connect(&self, replica: ReplicaName) -> Result<Box<dyn ReplicaConnection>>;
}

/// A live connection to one replica
///
/// Transaction control is explicit: the coordinator drives
/// `begin` / `set_local` / `execute` / `commit` / `rollback` itself.
#[async_trait]
pub trait ReplicaConnection: Send {
    /// Which replica this connection points at
    fn replica(&self) -> ReplicaName;

    /// Round-trip a trivial query
    async fn ping(&mut self) -> Result<()>;

    /// Open a transaction
    async fn begin(&mut self) -> Result<()>;

    /// Set a configuration value that lasts until the current transaction ends
    async fn set_local(&mut self, setting: &str, value: &str) -> Result<()>;

    /// Take a transaction-scoped advisory lock
    async fn advisory_lock(&mut self, key: i64) -> Result<()>;

    /// Execute a mutating statement, returning affected rows
    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Look up a partnership term
    async fn fetch_term(&mut self, numero_termo: &str) -> Result<Option<Term>>;

    /// Budget lines of a term revision, in insertion order
    async fn fetch_lines(&mut self, numero_termo: &str, aditivo: i32) -> Result<Vec<BudgetLine>>;

    /// Distinct non-empty expense categories
    async fn fetch_categories(&mut self) -> Result<Vec<String>>;

    /// Most frequent budget heading used with a category
    async fn fetch_suggested_rubrica(&mut self, categoria: &str) -> Result<Option<String>>;

    /// Audit rows matching a filter, newest first
    async fn fetch_audit(&mut self, filter: &AuditFilter) -> Result<Vec<AuditRecord>>;

    /// Aggregate audit statistics
    async fn fetch_audit_stats(&mut self) -> Result<AuditStats>;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<()>;
}
