//! Write Outcomes

use std::fmt;

use serde::Serialize;

use crate::config::ConsistencyMode;
use crate::replica::ReplicaName;

/// Result of one coordinator call on one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaOutcome {
    pub replica: ReplicaName,
    pub succeeded: bool,
    /// Rows affected by all statements of the call
    pub rows_affected: u64,
    /// Present iff the attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplicaOutcome {
    pub fn committed(replica: ReplicaName, rows_affected: u64) -> Self {
        Self {
            replica,
            succeeded: true,
            rows_affected,
            error: None,
        }
    }

    pub fn failed(replica: ReplicaName, error: impl fmt::Display) -> Self {
        Self {
            replica,
            succeeded: false,
            rows_affected: 0,
            error: Some(error.to_string()),
        }
    }

    /// The replica sat out the call because no connection was available
    pub fn unavailable(replica: ReplicaName, reason: impl fmt::Display) -> Self {
        Self::failed(replica, format!("replica unavailable: {}", reason))
    }
}

impl ConsistencyMode {
    /// Aggregate per-replica success into the overall flag
    pub fn is_satisfied(&self, local: bool, secondary: bool) -> bool {
        match self {
            ConsistencyMode::RequireAny => local || secondary,
            ConsistencyMode::RequireAll => local && secondary,
        }
    }
}

/// How far a write got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplicationStatus {
    FullyReplicated,
    PartiallyReplicated { surviving: ReplicaName },
    Failed,
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationStatus::FullyReplicated => write!(f, "fully replicated"),
            ReplicationStatus::PartiallyReplicated { surviving } => {
                write!(f, "partially replicated (only {} succeeded)", surviving)
            }
            ReplicationStatus::Failed => write!(f, "failed on all replicas"),
        }
    }
}

/// Aggregate of both replica outcomes for one coordinator call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DualWriteResult {
    pub success: bool,
    pub policy: ConsistencyMode,
    pub local: ReplicaOutcome,
    pub secondary: ReplicaOutcome,
}

impl DualWriteResult {
    pub fn new(policy: ConsistencyMode, local: ReplicaOutcome, secondary: ReplicaOutcome) -> Self {
        Self {
            success: policy.is_satisfied(local.succeeded, secondary.succeeded),
            policy,
            local,
            secondary,
        }
    }

    pub fn outcome(&self, replica: ReplicaName) -> &ReplicaOutcome {
        match replica {
            ReplicaName::Local => &self.local,
            ReplicaName::Secondary => &self.secondary,
        }
    }

    pub fn succeeded_on(&self, replica: ReplicaName) -> bool {
        self.outcome(replica).succeeded
    }

    pub fn status(&self) -> ReplicationStatus {
        match (self.local.succeeded, self.secondary.succeeded) {
            (true, true) => ReplicationStatus::FullyReplicated,
            (true, false) => ReplicationStatus::PartiallyReplicated {
                surviving: ReplicaName::Local,
            },
            (false, true) => ReplicationStatus::PartiallyReplicated {
                surviving: ReplicaName::Secondary,
            },
            (false, false) => ReplicationStatus::Failed,
        }
    }

    /// Error messages prefixed with the replica they came from
    pub fn errors(&self) -> Vec<String> {
        [&self.local, &self.secondary]
            .into_iter()
            .filter_map(|o| o.error.as_ref().map(|e| format!("{}: {}", o.replica, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_any_tolerates_one_failure() {
        let result = DualWriteResult::new(
            ConsistencyMode::RequireAny,
            ReplicaOutcome::committed(ReplicaName::Local, 1),
            ReplicaOutcome::unavailable(ReplicaName::Secondary, "connection refused"),
        );
        assert!(result.success);
        assert_eq!(
            result.status(),
            ReplicationStatus::PartiallyReplicated {
                surviving: ReplicaName::Local
            }
        );
        assert_eq!(
            result.errors(),
            vec!["secondary: replica unavailable: connection refused".to_string()]
        );
    }

    #[test]
    fn test_require_all_needs_both() {
        let result = DualWriteResult::new(
            ConsistencyMode::RequireAll,
            ReplicaOutcome::committed(ReplicaName::Local, 1),
            ReplicaOutcome::failed(ReplicaName::Secondary, "boom"),
        );
        assert!(!result.success);
        assert!(result.succeeded_on(ReplicaName::Local));
    }

    #[test]
    fn test_error_present_iff_failed() {
        let ok = ReplicaOutcome::committed(ReplicaName::Local, 0);
        let failed = ReplicaOutcome::failed(ReplicaName::Local, "x");
        assert!(ok.error.is_none());
        assert!(failed.error.is_some() && !failed.succeeded);
    }

    #[test]
    fn test_status_display() {
        let result = DualWriteResult::new(
            ConsistencyMode::RequireAny,
            ReplicaOutcome::failed(ReplicaName::Local, "a"),
            ReplicaOutcome::failed(ReplicaName::Secondary, "b"),
        );
        assert_eq!(result.status(), ReplicationStatus::Failed);
        assert_eq!(result.status().to_string(), "failed on all replicas");
    }
}
