//! Actor binding
//!
//! The acting user is handed to the database trigger through a
//! transaction-local setting. It vanishes at COMMIT or ROLLBACK, so a reused
//! connection never carries an actor into an unrelated transaction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::replica::ReplicaConnection;

/// Setting the audit trigger reads the actor from
pub const DEFAULT_ACTOR_SETTING: &str = "app.current_user_id";

/// Identifier of the user performing a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(i64);

impl ActorId {
    /// Actor used when the caller is not authenticated
    pub const SYSTEM: ActorId = ActorId(1);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    /// Parse an actor from an optional request header value.
    ///
    /// A missing or blank value means the system actor.
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(Self::SYSTEM);
        };
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(Error::Validation(format!("invalid user id '{}'", raw))),
        }
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::SYSTEM
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bind the actor for the rest of the open transaction on `conn`.
///
/// Must run after BEGIN and before the first audited statement.
pub async fn bind_actor(conn: &mut dyn ReplicaConnection, setting: &str, actor: ActorId) -> Result<()> {
    let replica = conn.replica();
    conn.set_local(setting, &actor.to_string())
        .await
        .map_err(|e| {
            Error::AuditContext(format!(
                "could not bind actor {} on replica {}: {}",
                actor, replica, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::memory::TxEvent;
    use crate::replica::{MemoryCluster, ReplicaConnector, ReplicaName};

    #[test]
    fn test_from_header() {
        assert_eq!(ActorId::from_header(None).unwrap(), ActorId::SYSTEM);
        assert_eq!(ActorId::from_header(Some("  ")).unwrap(), ActorId::SYSTEM);
        assert_eq!(ActorId::from_header(Some("17")).unwrap(), ActorId::new(17));
        assert!(ActorId::from_header(Some("abc")).is_err());
        assert!(ActorId::from_header(Some("0")).is_err());
    }

    #[tokio::test]
    async fn test_bind_actor_sets_local_value() {
        let cluster = MemoryCluster::new();
        let mut conn = cluster.connect(ReplicaName::Local).await.unwrap();

        conn.begin().await.unwrap();
        bind_actor(conn.as_mut(), DEFAULT_ACTOR_SETTING, ActorId::new(8))
            .await
            .unwrap();
        conn.rollback().await.unwrap();

        assert!(cluster.local().events().await.contains(&TxEvent::SetLocal {
            setting: DEFAULT_ACTOR_SETTING.to_string(),
            value: "8".to_string(),
        }));
    }
}
