//! Replica Scope
//!
//! Owns at most one connection per replica for one unit of work (typically
//! one HTTP request). Connections are opened lazily; a replica that cannot be
//! reached is remembered as unavailable for the rest of the scope instead of
//! failing the caller.

use std::sync::Arc;

use uuid::Uuid;

use super::{ReplicaConnection, ReplicaConnector, ReplicaName};
use crate::error::{Error, Result};

enum SlotState {
    Untried,
    Open(Box<dyn ReplicaConnection>),
    Unavailable(String),
}

/// Connection slot for one replica inside a scope
pub struct ReplicaSlot {
    name: ReplicaName,
    state: SlotState,
}

impl ReplicaSlot {
    fn new(name: ReplicaName) -> Self {
        Self {
            name,
            state: SlotState::Untried,
        }
    }

    pub fn name(&self) -> ReplicaName {
        self.name
    }

    /// Whether a connection is currently held
    pub fn is_open(&self) -> bool {
        matches!(self.state, SlotState::Open(_))
    }

    /// Reason the replica sits out this scope, if it does
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            SlotState::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }

    /// Get the slot's connection, opening it on first use.
    ///
    /// Returns the unavailability reason instead of an error so callers can
    /// record it as a per-replica outcome.
    pub async fn acquire(
        &mut self,
        connector: &dyn ReplicaConnector,
    ) -> std::result::Result<&mut dyn ReplicaConnection, String> {
        if matches!(self.state, SlotState::Untried) {
            self.state = match connector.connect(self.name).await {
                Ok(conn) => {
                    tracing::debug!("Connected to replica {}", self.name);
                    SlotState::Open(conn)
                }
                Err(e) => {
                    tracing::warn!("Replica {} unavailable: {}", self.name, e);
                    SlotState::Unavailable(e.to_string())
                }
            };
        }

        match &mut self.state {
            SlotState::Open(conn) => Ok(conn.as_mut()),
            SlotState::Unavailable(reason) => Err(reason.clone()),
            SlotState::Untried => Err("connection was never attempted".to_string()),
        }
    }

    /// Drop a connection whose state can no longer be trusted.
    ///
    /// The replica stays unavailable for the remainder of the scope.
    pub fn abandon(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Abandoning connection to replica {}: {}", self.name, reason);
        self.state = SlotState::Unavailable(reason);
    }

    async fn close(&mut self) {
        if let SlotState::Open(conn) = std::mem::replace(&mut self.state, SlotState::Untried) {
            if let Err(e) = conn.close().await {
                tracing::warn!("Error closing connection to replica {}: {}", self.name, e);
            }
        }
    }
}

/// Per-request connection scope over both replicas
pub struct ReplicaScope {
    id: Uuid,
    connector: Arc<dyn ReplicaConnector>,
    local: ReplicaSlot,
    secondary: ReplicaSlot,
}

impl ReplicaScope {
    /// Create an empty scope; no connection is opened until first use
    pub fn new(connector: Arc<dyn ReplicaConnector>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector,
            local: ReplicaSlot::new(ReplicaName::Local),
            secondary: ReplicaSlot::new(ReplicaName::Secondary),
        }
    }

    /// Identifier used to correlate log lines of one scope
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot(&self, name: ReplicaName) -> &ReplicaSlot {
        match name {
            ReplicaName::Local => &self.local,
            ReplicaName::Secondary => &self.secondary,
        }
    }

    pub fn slot_mut(&mut self, name: ReplicaName) -> &mut ReplicaSlot {
        match name {
            ReplicaName::Local => &mut self.local,
            ReplicaName::Secondary => &mut self.secondary,
        }
    }

    /// Acquire the connection for one replica
    pub async fn acquire(&mut self, name: ReplicaName) -> Result<&mut dyn ReplicaConnection> {
        let connector = Arc::clone(&self.connector);
        let slot = match name {
            ReplicaName::Local => &mut self.local,
            ReplicaName::Secondary => &mut self.secondary,
        };
        slot.acquire(connector.as_ref())
            .await
            .map_err(|reason| Error::ReplicaUnavailable {
                replica: name,
                reason,
            })
    }

    /// Acquire a connection for the read path: local first, secondary as fallback
    pub async fn acquire_readable(&mut self) -> Result<&mut dyn ReplicaConnection> {
        let connector = Arc::clone(&self.connector);
        if self.local.acquire(connector.as_ref()).await.is_ok() {
            return self.acquire(ReplicaName::Local).await;
        }
        if self.secondary.acquire(connector.as_ref()).await.is_ok() {
            tracing::info!("Local replica unavailable, reading from secondary");
            return self.acquire(ReplicaName::Secondary).await;
        }
        Err(Error::NoReadableReplica)
    }

    /// Borrow the connector and both slots at once, for fan-out
    pub fn parts_mut(&mut self) -> (&dyn ReplicaConnector, &mut ReplicaSlot, &mut ReplicaSlot) {
        (self.connector.as_ref(), &mut self.local, &mut self.secondary)
    }

    /// Close every connection opened in this scope.
    ///
    /// Never fails; close errors are logged. Dropping a scope without calling
    /// this still drops the connections.
    pub async fn release(mut self) {
        self.local.close().await;
        self.secondary.close().await;
        tracing::trace!("Released replica scope {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{FaultPlan, MemoryCluster};

    #[tokio::test]
    async fn test_reuses_connection_within_scope() {
        let cluster = MemoryCluster::new();
        let mut scope = ReplicaScope::new(cluster.connector());

        scope.acquire(ReplicaName::Local).await.unwrap().ping().await.unwrap();
        scope.acquire(ReplicaName::Local).await.unwrap().ping().await.unwrap();

        assert_eq!(cluster.local().connections_opened().await, 1);
        assert_eq!(cluster.secondary().connections_opened().await, 0);
        scope.release().await;
        assert_eq!(cluster.local().connections_closed().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_replica_is_remembered() {
        let cluster = MemoryCluster::new();
        cluster
            .secondary()
            .set_faults(FaultPlan::unreachable("connection refused"))
            .await;
        let mut scope = ReplicaScope::new(cluster.connector());

        let err = scope.acquire(ReplicaName::Secondary).await.err().unwrap();
        assert!(matches!(err, Error::ReplicaUnavailable { replica: ReplicaName::Secondary, .. }));
        assert!(scope.acquire(ReplicaName::Secondary).await.is_err());

        assert_eq!(cluster.secondary().connect_attempts().await, 1);
        assert!(scope
            .slot(ReplicaName::Secondary)
            .unavailable_reason()
            .unwrap()
            .contains("connection refused"));
        scope.release().await;
    }

    #[tokio::test]
    async fn test_readable_falls_back_to_secondary() {
        let cluster = MemoryCluster::new();
        cluster.local().set_faults(FaultPlan::unreachable("down")).await;
        let mut scope = ReplicaScope::new(cluster.connector());

        let conn = scope.acquire_readable().await.unwrap();
        assert_eq!(conn.replica(), ReplicaName::Secondary);
        scope.release().await;
    }

    #[tokio::test]
    async fn test_no_readable_replica() {
        let cluster = MemoryCluster::new();
        cluster.local().set_faults(FaultPlan::unreachable("down")).await;
        cluster.secondary().set_faults(FaultPlan::unreachable("down")).await;
        let mut scope = ReplicaScope::new(cluster.connector());

        assert!(matches!(
            scope.acquire_readable().await.err().unwrap(),
            Error::NoReadableReplica
        ));
        // Release tolerates slots that never opened
        scope.release().await;
    }

    #[tokio::test]
    async fn test_abandon_marks_unavailable() {
        let cluster = MemoryCluster::new();
        let mut scope = ReplicaScope::new(cluster.connector());
        scope.acquire(ReplicaName::Local).await.unwrap();

        scope.slot_mut(ReplicaName::Local).abandon("timed out");
        assert!(!scope.slot(ReplicaName::Local).is_open());
        assert!(scope.acquire(ReplicaName::Local).await.is_err());
        scope.release().await;
    }
}
