//! Dual Writer
//!
//! Runs a unit of work on both replicas, each in its own transaction, and
//! reports what happened on each. Failures never cross from one replica to
//! the other and never escape as errors; they end up in the
//! [`ReplicaOutcome`] of the replica they happened on.

use std::future::Future;
use std::time::Duration;

use crate::audit::{bind_actor, ActorId};
use crate::config::{AuditConfig, ConsistencyMode, CoordinatorConfig, FanOut};
use crate::error::{Error, Result};
use crate::replica::{ReplicaConnection, ReplicaConnector, ReplicaName, ReplicaScope, ReplicaSlot};

use super::{DualWriteResult, ReplicaOutcome, WriteStatement};

/// Statements executed together in one transaction per replica
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    statements: Vec<WriteStatement>,
    actor: Option<ActorId>,
    lock_key: Option<i64>,
}

impl UnitOfWork {
    pub fn new(statements: Vec<WriteStatement>) -> Self {
        Self {
            statements,
            actor: None,
            lock_key: None,
        }
    }

    pub fn single(statement: WriteStatement) -> Self {
        Self::new(vec![statement])
    }

    /// Bind this actor before the first statement
    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Take this transaction-scoped advisory lock right after BEGIN
    pub fn with_lock(mut self, key: i64) -> Self {
        self.lock_key = Some(key);
        self
    }

    pub fn statements(&self) -> &[WriteStatement] {
        &self.statements
    }

    pub fn actor(&self) -> Option<ActorId> {
        self.actor
    }

    pub fn lock_key(&self) -> Option<i64> {
        self.lock_key
    }
}

/// The dual-replica write coordinator
#[derive(Debug, Clone)]
pub struct DualWriter {
    policy: ConsistencyMode,
    fan_out: FanOut,
    step_timeout: Duration,
    actor_setting: String,
}

impl DualWriter {
    pub fn new(coordinator: &CoordinatorConfig, audit: &AuditConfig) -> Self {
        Self {
            policy: coordinator.consistency,
            fan_out: coordinator.fan_out,
            step_timeout: coordinator.statement_timeout(),
            actor_setting: audit.actor_setting.clone(),
        }
    }

    /// Execute a statement on both replicas without binding an actor
    pub async fn write_plain(&self, scope: &mut ReplicaScope, statement: &WriteStatement) -> DualWriteResult {
        self.write_unit(scope, &UnitOfWork::single(statement.clone())).await
    }

    /// Execute a statement on both replicas with the actor bound in each transaction
    pub async fn write_audited(
        &self,
        scope: &mut ReplicaScope,
        statement: &WriteStatement,
        actor: ActorId,
    ) -> DualWriteResult {
        let unit = UnitOfWork::single(statement.clone()).with_actor(actor);
        self.write_unit(scope, &unit).await
    }

    /// Execute a unit of work on both replicas
    pub async fn write_unit(&self, scope: &mut ReplicaScope, unit: &UnitOfWork) -> DualWriteResult {
        let scope_id = scope.id();
        let (connector, local, secondary) = scope.parts_mut();

        let (local, secondary) = match self.fan_out {
            FanOut::Concurrent => tokio::join!(
                self.run_on(connector, local, unit),
                self.run_on(connector, secondary, unit)
            ),
            FanOut::Sequential => {
                let local = self.run_on(connector, local, unit).await;
                let secondary = self.run_on(connector, secondary, unit).await;
                (local, secondary)
            }
        };

        let result = DualWriteResult::new(self.policy, local, secondary);
        tracing::debug!(
            "Scope {} wrote {} statement(s): {}",
            scope_id,
            unit.statements().len(),
            result.status()
        );
        result
    }

    async fn run_on(
        &self,
        connector: &dyn ReplicaConnector,
        slot: &mut ReplicaSlot,
        unit: &UnitOfWork,
    ) -> ReplicaOutcome {
        let name = slot.name();

        let conn = match tokio::time::timeout(self.step_timeout, slot.acquire(connector)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(reason)) => return ReplicaOutcome::unavailable(name, reason),
            Err(_) => {
                let err = self.timeout_error(name, "connect");
                slot.abandon(err.to_string());
                return ReplicaOutcome::unavailable(name, err);
            }
        };

        match self.transact(name, conn, unit).await {
            Ok(rows) => {
                tracing::debug!("Committed on replica {} ({} rows)", name, rows);
                ReplicaOutcome::committed(name, rows)
            }
            Err(e) => {
                tracing::warn!("Write failed on replica {}: {}", name, e);
                self.rollback(name, conn).await;
                if matches!(e, Error::Timeout { .. }) {
                    // The server may still be working on the abandoned step
                    slot.abandon(e.to_string());
                }
                ReplicaOutcome::failed(name, e)
            }
        }
    }

    async fn transact(
        &self,
        name: ReplicaName,
        conn: &mut dyn ReplicaConnection,
        unit: &UnitOfWork,
    ) -> Result<u64> {
        self.bounded(name, "begin", conn.begin()).await?;

        if let Some(key) = unit.lock_key() {
            self.bounded(name, "advisory lock", conn.advisory_lock(key)).await?;
        }
        if let Some(actor) = unit.actor() {
            self.bounded(name, "bind actor", bind_actor(conn, &self.actor_setting, actor))
                .await?;
        }

        let mut rows = 0;
        for statement in unit.statements() {
            tracing::trace!("Executing {:08x} on replica {}: {}", statement.fingerprint(), name, statement);
            rows += self.bounded(name, "execute", conn.execute(statement)).await?;
        }

        self.bounded(name, "commit", conn.commit()).await?;
        Ok(rows)
    }

    async fn rollback(&self, name: ReplicaName, conn: &mut dyn ReplicaConnection) {
        if let Err(e) = self.bounded(name, "rollback", conn.rollback()).await {
            tracing::warn!("Rollback on replica {} failed: {}", name, e);
        }
    }

    async fn bounded<T>(
        &self,
        replica: ReplicaName,
        operation: &'static str,
        step: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.step_timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(replica, operation)),
        }
    }

    fn timeout_error(&self, replica: ReplicaName, operation: &'static str) -> Error {
        Error::Timeout {
            replica,
            operation,
            millis: self.step_timeout.as_millis() as u64,
        }
    }
}
