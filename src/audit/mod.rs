//! Audit Module
//!
//! Everything around the database-resident audit trail: binding the acting
//! user into a transaction, the records the trigger produces, browsing and
//! summarising them, and installing or removing the trigger itself.

mod browse;
mod context;
mod query;
mod record;
pub mod trigger;

pub use browse::{audit_stats, audit_trail};
pub use context::{bind_actor, ActorId, DEFAULT_ACTOR_SETTING};
pub use query::{AuditFilter, AUDIT_STATS_SQL, DEFAULT_LIMIT, MAX_LIMIT, TOP_ACTORS_SQL};
pub use record::{diff_snapshots, ActorActivity, AuditAction, AuditRecord, AuditStats, FieldChange};
