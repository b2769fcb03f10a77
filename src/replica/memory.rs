//! In-memory Replica
//!
//! A replica backend that keeps the budget table, the audit table and the
//! audit trigger behaviour in process memory. Used by tests and by
//! `dualwrite serve --memory` for local experiments. Faults (unreachable
//! replica, failing statements, failing rollback, slow statements) can be
//! injected per replica.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{ReplicaConnection, ReplicaConnector, ReplicaName};
use crate::audit::{ActorActivity, AuditAction, AuditFilter, AuditRecord, AuditStats, DEFAULT_ACTOR_SETTING};
use crate::budget::{statements, BudgetLine, Term};
use crate::config::TriggerMode;
use crate::coordinator::{SqlValue, StatementKind, WriteStatement};
use crate::error::{Error, Result};

/// Faults to inject into a memory replica
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Refuse connections with this message
    pub unreachable: Option<String>,
    /// Fail every execute after this many successful ones, with a message
    pub fail_execute: Option<(usize, String)>,
    /// Make rollback itself fail
    pub fail_rollback: bool,
    /// Sleep before each execute
    pub execute_delay: Option<Duration>,
}

impl FaultPlan {
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            unreachable: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn fail_execute(message: impl Into<String>) -> Self {
        Self::fail_execute_after(0, message)
    }

    pub fn fail_execute_after(successes: usize, message: impl Into<String>) -> Self {
        Self {
            fail_execute: Some((successes, message.into())),
            ..Default::default()
        }
    }

    pub fn slow_execute(delay: Duration) -> Self {
        Self {
            execute_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn with_failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }
}

/// Transaction-level events recorded by a memory replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    SetLocal { setting: String, value: String },
    AdvisoryLock(i64),
    Execute(StatementKind),
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    lines: Vec<BudgetLine>,
    audit: Vec<AuditRecord>,
    next_line_id: i64,
    next_audit_id: i64,
    trigger: Option<TriggerMode>,
    // Setting the trigger function reads the actor from
    actor_setting: String,
    // Mode of the most recently created trigger function
    pending_function: Option<TriggerMode>,
}

#[derive(Debug, Default)]
struct ReplicaState {
    faults: FaultPlan,
    committed: Tables,
    terms: BTreeMap<String, Term>,
    users: HashMap<i64, String>,
    statements: Vec<WriteStatement>,
    events: Vec<TxEvent>,
    successful_executes: usize,
    connect_attempts: usize,
    connections_opened: usize,
    connections_closed: usize,
}

/// Handle to one in-memory replica
#[derive(Clone)]
pub struct MemoryReplica {
    name: ReplicaName,
    state: Arc<Mutex<ReplicaState>>,
}

impl MemoryReplica {
    /// Create a replica with the strict audit trigger installed
    pub fn new(name: ReplicaName) -> Self {
        let mut state = ReplicaState::default();
        state.committed.next_line_id = 1;
        state.committed.next_audit_id = 1;
        state.committed.trigger = Some(TriggerMode::Strict);
        state.committed.actor_setting = DEFAULT_ACTOR_SETTING.to_string();
        Self {
            name,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn name(&self) -> ReplicaName {
        self.name
    }

    pub async fn set_faults(&self, faults: FaultPlan) {
        self.state.lock().await.faults = faults;
    }

    /// Install (`Some`) or drop (`None`) the audit trigger
    pub async fn set_trigger(&self, mode: Option<TriggerMode>) {
        self.state.lock().await.committed.trigger = mode;
    }

    pub async fn trigger(&self) -> Option<TriggerMode> {
        self.state.lock().await.committed.trigger
    }

    pub async fn seed_term(&self, term: Term) {
        let mut state = self.state.lock().await;
        state.terms.insert(term.numero_termo.clone(), term);
    }

    pub async fn seed_user(&self, id: i64, email: impl Into<String>) {
        self.state.lock().await.users.insert(id, email.into());
    }

    /// Committed budget lines
    pub async fn lines(&self) -> Vec<BudgetLine> {
        self.state.lock().await.committed.lines.clone()
    }

    /// Committed audit rows
    pub async fn audit_rows(&self) -> Vec<AuditRecord> {
        self.state.lock().await.committed.audit.clone()
    }

    /// Every statement this replica was asked to execute, in order
    pub async fn received_statements(&self) -> Vec<WriteStatement> {
        self.state.lock().await.statements.clone()
    }

    pub async fn events(&self) -> Vec<TxEvent> {
        self.state.lock().await.events.clone()
    }

    pub async fn connect_attempts(&self) -> usize {
        self.state.lock().await.connect_attempts
    }

    pub async fn connections_opened(&self) -> usize {
        self.state.lock().await.connections_opened
    }

    pub async fn connections_closed(&self) -> usize {
        self.state.lock().await.connections_closed
    }

    async fn open(&self) -> Result<MemoryConnection> {
        let mut state = self.state.lock().await;
        state.connect_attempts += 1;
        if let Some(reason) = &state.faults.unreachable {
            return Err(Error::ReplicaUnavailable {
                replica: self.name,
                reason: reason.clone(),
            });
        }
        state.connections_opened += 1;
        Ok(MemoryConnection {
            replica: self.clone(),
            tx: None,
        })
    }
}

/// Both memory replicas, usable as a [`ReplicaConnector`]
#[derive(Clone)]
pub struct MemoryCluster {
    local: MemoryReplica,
    secondary: MemoryReplica,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            local: MemoryReplica::new(ReplicaName::Local),
            secondary: MemoryReplica::new(ReplicaName::Secondary),
        }
    }

    pub fn local(&self) -> &MemoryReplica {
        &self.local
    }

    pub fn secondary(&self) -> &MemoryReplica {
        &self.secondary
    }

    pub fn replica(&self, name: ReplicaName) -> &MemoryReplica {
        match name {
            ReplicaName::Local => &self.local,
            ReplicaName::Secondary => &self.secondary,
        }
    }

    /// Seed a term on both replicas
    pub async fn seed_term(&self, term: Term) {
        self.local.seed_term(term.clone()).await;
        self.secondary.seed_term(term).await;
    }

    pub fn connector(&self) -> Arc<dyn ReplicaConnector> {
        Arc::new(self.clone())
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaConnector for MemoryCluster {
    async fn connect(&self, replica: ReplicaName) -> Result<Box<dyn ReplicaConnection>> {
        let conn = self.replica(replica).open().await?;
        Ok(Box::new(conn))
    }
}

struct OpenTransaction {
    staged: Tables,
    settings: HashMap<String, String>,
}

/// Connection to a memory replica
pub struct MemoryConnection {
    replica: MemoryReplica,
    tx: Option<OpenTransaction>,
}

impl MemoryConnection {
    async fn record(&self, event: TxEvent) {
        self.replica.state.lock().await.events.push(event);
    }
}

#[async_trait]
impl ReplicaConnection for MemoryConnection {
    fn replica(&self) -> ReplicaName {
        self.replica.name
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            tracing::warn!("there is already a transaction in progress");
            return Ok(());
        }
        let staged = self.replica.state.lock().await.committed.clone();
        self.tx = Some(OpenTransaction {
            staged,
            settings: HashMap::new(),
        });
        self.record(TxEvent::Begin).await;
        Ok(())
    }

    async fn set_local(&mut self, setting: &str, value: &str) -> Result<()> {
        // Outside a transaction the value would vanish with the implicit one
        if let Some(tx) = self.tx.as_mut() {
            tx.settings.insert(setting.to_string(), value.to_string());
        }
        self.record(TxEvent::SetLocal {
            setting: setting.to_string(),
            value: value.to_string(),
        })
        .await;
        Ok(())
    }

    async fn advisory_lock(&mut self, key: i64) -> Result<()> {
        self.record(TxEvent::AdvisoryLock(key)).await;
        Ok(())
    }

    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64> {
        let (delay, failure) = {
            let mut state = self.replica.state.lock().await;
            state.statements.push(statement.clone());
            state.events.push(TxEvent::Execute(statement.kind()));
            let failure = match &state.faults.fail_execute {
                Some((successes, message)) if state.successful_executes >= *successes => {
                    Some(message.clone())
                }
                _ => None,
            };
            (state.faults.execute_delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(Error::QueryExecution(message));
        }

        let tx = self.tx.as_mut().ok_or_else(|| {
            Error::QueryExecution("memory replica only executes inside a transaction".into())
        })?;
        let actor = tx.settings.get(&tx.staged.actor_setting).cloned();
        let rows = apply_statement(&mut tx.staged, statement, actor.as_deref())?;

        self.replica.state.lock().await.successful_executes += 1;
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| Error::QueryExecution("no transaction in progress".into()))?;
        {
            let mut state = self.replica.state.lock().await;
            state.committed = tx.staged;
        }
        self.record(TxEvent::Commit).await;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.tx = None;
        self.record(TxEvent::Rollback).await;
        if self.replica.state.lock().await.faults.fail_rollback {
            return Err(Error::QueryExecution("server closed the connection unexpectedly".into()));
        }
        Ok(())
    }

    async fn fetch_term(&mut self, numero_termo: &str) -> Result<Option<Term>> {
        Ok(self.replica.state.lock().await.terms.get(numero_termo).cloned())
    }

    async fn fetch_lines(&mut self, numero_termo: &str, aditivo: i32) -> Result<Vec<BudgetLine>> {
        let state = self.replica.state.lock().await;
        Ok(state
            .committed
            .lines
            .iter()
            .filter(|l| l.numero_termo == numero_termo && l.aditivo == aditivo)
            .cloned()
            .collect())
    }

    async fn fetch_categories(&mut self) -> Result<Vec<String>> {
        let state = self.replica.state.lock().await;
        let mut categories: Vec<String> = state
            .committed
            .lines
            .iter()
            .map(|l| l.categoria_despesa.clone())
            .filter(|c| !c.is_empty())
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    async fn fetch_suggested_rubrica(&mut self, categoria: &str) -> Result<Option<String>> {
        let state = self.replica.state.lock().await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for line in &state.committed.lines {
            if line.categoria_despesa == categoria && !line.rubrica.is_empty() {
                *counts.entry(line.rubrica.as_str()).or_default() += 1;
            }
        }
        // max_by_key keeps the last maximum; iterate reversed to prefer the first name
        Ok(counts
            .into_iter()
            .rev()
            .max_by_key(|(_, n)| *n)
            .map(|(rubrica, _)| rubrica.to_string()))
    }

    async fn fetch_audit(&mut self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let state = self.replica.state.lock().await;
        let tables = &state.committed;
        let mut rows: Vec<AuditRecord> = tables
            .audit
            .iter()
            .cloned()
            .map(|mut rec| {
                rec.actor_email = state.users.get(&rec.actor_id).cloned();
                rec.numero_termo = tables
                    .lines
                    .iter()
                    .find(|l| l.id == rec.row_id)
                    .map(|l| l.numero_termo.clone());
                rec
            })
            .filter(|rec| filter.matches(rec))
            .collect();
        rows.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(b.id.cmp(&a.id)));
        rows.truncate(filter.limit() as usize);
        Ok(rows)
    }

    async fn fetch_audit_stats(&mut self) -> Result<AuditStats> {
        let state = self.replica.state.lock().await;
        let audit = &state.committed.audit;

        let mut stats = AuditStats::default();
        stats.total = audit.len() as i64;
        let mut actors: BTreeMap<i64, i64> = BTreeMap::new();
        let mut rows: Vec<i64> = Vec::new();
        for rec in audit {
            match rec.action {
                AuditAction::Insert => stats.inserts += 1,
                AuditAction::Update => stats.updates += 1,
                AuditAction::Delete => stats.deletes += 1,
            }
            *actors.entry(rec.actor_id).or_default() += 1;
            rows.push(rec.row_id);
            stats.first_modification = Some(match stats.first_modification {
                Some(first) => first.min(rec.modified_at),
                None => rec.modified_at,
            });
            stats.last_modification = stats.last_modification.max(Some(rec.modified_at));
        }
        rows.sort_unstable();
        rows.dedup();
        stats.distinct_actors = actors.len() as i64;
        stats.distinct_rows = rows.len() as i64;

        let mut top: Vec<ActorActivity> = actors
            .into_iter()
            .filter_map(|(id, actions)| {
                state.users.get(&id).map(|email| ActorActivity {
                    email: email.clone(),
                    actions,
                })
            })
            .collect();
        top.sort_by(|a, b| b.actions.cmp(&a.actions).then(a.email.cmp(&b.email)));
        top.truncate(5);
        stats.top_actors = top;
        Ok(stats)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.replica.state.lock().await.connections_closed += 1;
        Ok(())
    }
}

fn text_param(params: &[SqlValue], idx: usize) -> Result<String> {
    match params.get(idx) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(SqlValue::Null) => Ok(String::new()),
        other => Err(Error::QueryExecution(format!(
            "parameter ${} must be text, got {:?}",
            idx + 1,
            other
        ))),
    }
}

fn int_param(params: &[SqlValue], idx: usize) -> Result<Option<i64>> {
    match params.get(idx) {
        Some(SqlValue::Int(i)) => Ok(Some(*i)),
        Some(SqlValue::Null) => Ok(None),
        other => Err(Error::QueryExecution(format!(
            "parameter ${} must be an integer, got {:?}",
            idx + 1,
            other
        ))),
    }
}

fn decimal_param(params: &[SqlValue], idx: usize) -> Result<Decimal> {
    match params.get(idx) {
        Some(SqlValue::Decimal(d)) => Ok(*d),
        Some(SqlValue::Int(i)) => Ok(Decimal::from(*i)),
        other => Err(Error::QueryExecution(format!(
            "parameter ${} must be numeric, got {:?}",
            idx + 1,
            other
        ))),
    }
}

fn to_i32(value: i64, column: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::QueryExecution(format!("integer out of range for column {}", column)))
}

/// Resolve the actor the way the installed trigger would
fn trigger_actor(mode: TriggerMode, name: &str, setting: Option<&str>) -> Result<i64> {
    match (setting.map(str::parse::<i64>), mode) {
        (Some(Ok(id)), _) => Ok(id),
        (Some(Err(_)), _) => Err(Error::QueryExecution(format!(
            "invalid input syntax for type integer: \"{}\"",
            setting.unwrap_or_default()
        ))),
        (None, TriggerMode::Lenient) => Ok(crate::audit::ActorId::SYSTEM.get()),
        (None, TriggerMode::Strict) => Err(Error::QueryExecution(format!(
            "{} is not set; bind the acting user before DML",
            name
        ))),
    }
}

fn audit_row(
    tables: &mut Tables,
    actor: Option<&str>,
    action: AuditAction,
    before: Option<&BudgetLine>,
    after: Option<&BudgetLine>,
) -> Result<()> {
    let Some(mode) = tables.trigger else {
        return Ok(());
    };
    let actor_id = trigger_actor(mode, &tables.actor_setting, actor)?;
    let row_id = after.or(before).map(|l| l.id).unwrap_or_default();
    let id = tables.next_audit_id;
    tables.next_audit_id += 1;
    tables.audit.push(AuditRecord {
        id,
        row_id,
        actor_id,
        action,
        before: before.and_then(|l| serde_json::to_value(l).ok()),
        after: after.and_then(|l| serde_json::to_value(l).ok()),
        modified_at: Utc::now(),
        actor_email: None,
        numero_termo: None,
    });
    Ok(())
}

fn apply_statement(
    tables: &mut Tables,
    statement: &WriteStatement,
    actor: Option<&str>,
) -> Result<u64> {
    let params = statement.params();
    let sql = statement.sql();

    if sql == statements::DELETE_LINES_SQL {
        let numero_termo = text_param(params, 0)?;
        let aditivo = int_param(params, 1)?.unwrap_or_default();
        let (removed, kept): (Vec<BudgetLine>, Vec<BudgetLine>) = std::mem::take(&mut tables.lines)
            .into_iter()
            .partition(|l| l.numero_termo == numero_termo && i64::from(l.aditivo) == aditivo);
        tables.lines = kept;
        for line in &removed {
            audit_row(tables, actor, AuditAction::Delete, Some(line), None)?;
        }
        return Ok(removed.len() as u64);
    }

    if sql == statements::INSERT_LINE_SQL {
        let line = BudgetLine {
            id: tables.next_line_id,
            numero_termo: text_param(params, 0)?,
            rubrica: text_param(params, 1)?,
            quantidade: int_param(params, 2)?
                .map(|q| to_i32(q, "quantidade"))
                .transpose()?,
            categoria_despesa: text_param(params, 3)?,
            valor: decimal_param(params, 4)?,
            mes: to_i32(int_param(params, 5)?.unwrap_or_default(), "mes")?,
            aditivo: to_i32(int_param(params, 6)?.unwrap_or_default(), "aditivo")?,
        };
        tables.next_line_id += 1;
        audit_row(tables, actor, AuditAction::Insert, None, Some(&line))?;
        tables.lines.push(line);
        return Ok(1);
    }

    if sql == statements::UPDATE_AMOUNT_SQL {
        let valor = decimal_param(params, 0)?;
        let numero_termo = text_param(params, 1)?;
        let aditivo = int_param(params, 2)?.unwrap_or_default();
        let rubrica = text_param(params, 3)?;
        let categoria = text_param(params, 4)?;
        let mes = int_param(params, 5)?.unwrap_or_default();
        let matching: Vec<usize> = tables
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                l.numero_termo == numero_termo
                    && i64::from(l.aditivo) == aditivo
                    && l.rubrica == rubrica
                    && l.categoria_despesa == categoria
                    && i64::from(l.mes) == mes
            })
            .map(|(i, _)| i)
            .collect();
        for &pos in &matching {
            let before = tables.lines[pos].clone();
            tables.lines[pos].valor = valor;
            let after = tables.lines[pos].clone();
            audit_row(tables, actor, AuditAction::Update, Some(&before), Some(&after))?;
        }
        return Ok(matching.len() as u64);
    }

    if statement.kind() == StatementKind::Schema {
        apply_schema_change(tables, sql);
        return Ok(0);
    }

    Err(Error::QueryExecution(format!(
        "memory replica cannot execute '{}'",
        statement
    )))
}

fn apply_schema_change(tables: &mut Tables, sql: &str) {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("CREATE OR REPLACE FUNCTION") || upper.starts_with("CREATE FUNCTION") {
        tables.pending_function = Some(if upper.contains("RAISE EXCEPTION") {
            TriggerMode::Strict
        } else {
            TriggerMode::Lenient
        });
        if let Some(setting) = sql
            .split("current_setting('")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
        {
            tables.actor_setting = setting.to_string();
        }
    } else if upper.starts_with("CREATE TRIGGER") {
        tables.trigger = tables.pending_function.or(Some(TriggerMode::Strict));
    } else if upper.starts_with("DROP TRIGGER") {
        tables.trigger = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::statements::{delete_lines, insert_line};
    use crate::budget::NewBudgetLine;

    fn line(valor: i64, mes: i32) -> NewBudgetLine {
        NewBudgetLine {
            numero_termo: "T-001".into(),
            rubrica: "Pessoal".into(),
            quantidade: Some(1),
            categoria_despesa: "Salários".into(),
            valor: Decimal::new(valor, 2),
            mes,
            aditivo: 0,
        }
    }

    async fn open(replica: &MemoryReplica) -> MemoryConnection {
        replica.open().await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_writes_audit_row_with_actor() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "42").await.unwrap();
        conn.execute(&insert_line(&line(100_000, 1))).await.unwrap();
        conn.commit().await.unwrap();

        let audit = replica.audit_rows().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].actor_id, 42);
        assert_eq!(audit[0].action, AuditAction::Insert);
        assert!(audit[0].before.is_none());
        assert!(audit[0].after.is_some());
    }

    #[tokio::test]
    async fn test_strict_trigger_rejects_missing_actor() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        let err = conn.execute(&insert_line(&line(100, 1))).await.unwrap_err();
        assert!(err.to_string().contains("is not set"));
        conn.rollback().await.unwrap();
        assert!(replica.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_lenient_trigger_defaults_to_system_actor() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        replica.set_trigger(Some(TriggerMode::Lenient)).await;
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.execute(&insert_line(&line(100, 1))).await.unwrap();
        conn.commit().await.unwrap();
        assert_eq!(replica.audit_rows().await[0].actor_id, 1);
    }

    #[tokio::test]
    async fn test_setting_does_not_outlive_transaction() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "7").await.unwrap();
        conn.execute(&insert_line(&line(100, 1))).await.unwrap();
        conn.commit().await.unwrap();

        conn.begin().await.unwrap();
        assert!(conn.execute(&insert_line(&line(100, 2))).await.is_err());
        conn.rollback().await.unwrap();
        assert_eq!(replica.lines().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_rows() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "1").await.unwrap();
        conn.execute(&insert_line(&line(100, 1))).await.unwrap();
        conn.rollback().await.unwrap();

        assert!(replica.lines().await.is_empty());
        assert!(replica.audit_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_matches_writes_no_audit() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "3").await.unwrap();
        let rows = conn.execute(&delete_lines("T-001", 0)).await.unwrap();
        conn.commit().await.unwrap();

        assert_eq!(rows, 0);
        assert!(replica.audit_rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_fail_execute_after() {
        let replica = MemoryReplica::new(ReplicaName::Secondary);
        replica
            .set_faults(FaultPlan::fail_execute_after(1, "duplicate key value"))
            .await;
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "1").await.unwrap();
        conn.execute(&insert_line(&line(100, 1))).await.unwrap();
        let err = conn.execute(&insert_line(&line(100, 2))).await.unwrap_err();
        assert!(err.to_string().contains("duplicate key value"));
    }

    #[tokio::test]
    async fn test_unknown_statement_with_accented_text_is_rejected() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;

        conn.begin().await.unwrap();
        let stmt = WriteStatement::new(
            "UPDATE parcerias_despesas SET categoria_despesa = 'Conservação de equipamentos' WHERE id = $1",
        )
        .bind(1i64);
        let err = conn.execute(&stmt).await.unwrap_err();
        assert!(matches!(err, Error::QueryExecution(_)));
        assert!(err.to_string().contains("Conservação"));
        conn.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_suggested_rubrica_prefers_most_frequent() {
        let replica = MemoryReplica::new(ReplicaName::Local);
        let mut conn = open(&replica).await;
        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "1").await.unwrap();
        for (rubrica, mes) in [("Pessoal", 1), ("Encargos", 2), ("Encargos", 3)] {
            let mut l = line(100, mes);
            l.rubrica = rubrica.into();
            conn.execute(&insert_line(&l)).await.unwrap();
        }
        conn.commit().await.unwrap();

        assert_eq!(
            conn.fetch_suggested_rubrica("Salários").await.unwrap().as_deref(),
            Some("Encargos")
        );
        assert_eq!(conn.fetch_suggested_rubrica("Outros").await.unwrap(), None);
        assert_eq!(conn.fetch_categories().await.unwrap(), vec!["Salários".to_string()]);
    }
}
