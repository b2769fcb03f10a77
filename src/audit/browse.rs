//! Reading the audit trail
//!
//! Audit history is kept per replica and never merged, so every read names
//! the replica it comes from. Without an explicit choice the local replica
//! is read, falling back to the secondary.

use super::{AuditFilter, AuditRecord, AuditStats};
use crate::error::Result;
use crate::replica::{ReplicaName, ReplicaScope};

/// Audit rows matching `filter`, newest first, and the replica they came from
pub async fn audit_trail(
    scope: &mut ReplicaScope,
    replica: Option<ReplicaName>,
    filter: &AuditFilter,
) -> Result<(ReplicaName, Vec<AuditRecord>)> {
    let conn = match replica {
        Some(name) => scope.acquire(name).await?,
        None => scope.acquire_readable().await?,
    };
    let source = conn.replica();
    Ok((source, conn.fetch_audit(filter).await?))
}

/// Aggregate statistics of one replica's audit table
pub async fn audit_stats(
    scope: &mut ReplicaScope,
    replica: Option<ReplicaName>,
) -> Result<(ReplicaName, AuditStats)> {
    let conn = match replica {
        Some(name) => scope.acquire(name).await?,
        None => scope.acquire_readable().await?,
    };
    let source = conn.replica();
    Ok((source, conn.fetch_audit_stats().await?))
}
