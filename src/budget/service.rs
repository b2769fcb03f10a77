//! Budget use cases
//!
//! Replacing the lines of a term revision through the dual writer, plus
//! the single-replica reads the budget screens need.

use rust_decimal::Decimal;
use serde::Serialize;

use super::locks::TermLocks;
use super::model::{group_lines, AmountUpdate, BudgetRow, NewBudgetLine, ReplaceRequest, Term, TermInfo};
use super::money::{amount_from_value, quantity_from_value};
use super::statements::{delete_lines, insert_line, replace_lock_key, update_amount};
use crate::audit::ActorId;
use crate::config::{BudgetConfig, ReplaceStrategy};
use crate::coordinator::{DualWriteResult, DualWriter, UnitOfWork};
use crate::error::{Error, Result};
use crate::replica::{ReplicaName, ReplicaScope};

/// Returned instead of writing when the submitted total is off
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalMismatch {
    pub warning: bool,
    pub message: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_inserido: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_previsto: Decimal,
    pub registros: usize,
}

/// How many replicas ended up with exactly the submitted set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum ReplaceStatus {
    AllReplicas,
    OneReplica { replica: ReplicaName },
    NoReplica,
}

/// Per-replica line counts of a replace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaCounts {
    pub local: bool,
    pub secondary: bool,
    pub local_count: usize,
    pub secondary_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaceSummary {
    pub message: String,
    pub status: ReplaceStatus,
    pub strategy: ReplaceStrategy,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_inserido: Decimal,
    pub registros: usize,
    pub databases: ReplicaCounts,
    pub errors: Option<Vec<String>>,
}

impl ReplaceSummary {
    fn new(
        strategy: ReplaceStrategy,
        total: Decimal,
        registros: usize,
        deleted: [bool; 2],
        inserted: [usize; 2],
        errors: Vec<String>,
    ) -> Self {
        let consistent = [
            deleted[0] && inserted[0] == registros,
            deleted[1] && inserted[1] == registros,
        ];
        let status = match consistent {
            [true, true] => ReplaceStatus::AllReplicas,
            [true, false] => ReplaceStatus::OneReplica {
                replica: ReplicaName::Local,
            },
            [false, true] => ReplaceStatus::OneReplica {
                replica: ReplicaName::Secondary,
            },
            [false, false] => ReplaceStatus::NoReplica,
        };
        let message = match status {
            ReplaceStatus::AllReplicas => "Saved on both replicas (local and secondary)".to_string(),
            ReplaceStatus::OneReplica { replica } => {
                format!("Saved only on replica {} (1/2 replicas)", replica)
            }
            ReplaceStatus::NoReplica => "Nothing was saved on any replica".to_string(),
        };

        Self {
            message,
            status,
            strategy,
            total_inserido: total,
            registros,
            databases: ReplicaCounts {
                local: consistent[0],
                secondary: consistent[1],
                local_count: inserted[0],
                secondary_count: inserted[1],
            },
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }
}

/// Outcome of a replace request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplaceOutcome {
    TotalMismatch(TotalMismatch),
    Applied(ReplaceSummary),
}

/// Budget operations over a replica scope
pub struct BudgetService {
    writer: DualWriter,
    tolerance: Decimal,
    strategy: ReplaceStrategy,
    locks: TermLocks,
}

impl BudgetService {
    pub fn new(writer: DualWriter, config: &BudgetConfig) -> Self {
        Self {
            writer,
            tolerance: config.tolerance,
            strategy: config.replace_strategy,
            locks: TermLocks::new(),
        }
    }

    /// Replace every line of `(numero_termo, aditivo)` with the submitted set.
    ///
    /// Unless `confirm` is set, the submitted total must match the term's
    /// expected total within the configured tolerance; otherwise nothing is
    /// written and a [`TotalMismatch`] is returned.
    pub async fn replace_term_budget_lines(
        &self,
        scope: &mut ReplicaScope,
        request: &ReplaceRequest,
        actor: ActorId,
        confirm: bool,
    ) -> Result<ReplaceOutcome> {
        let numero_termo = request.numero_termo.trim();
        if numero_termo.is_empty() || request.despesas.is_empty() {
            return Err(Error::Validation(
                "numero_termo and despesas are required".to_string(),
            ));
        }
        let aditivo = request.aditivo;

        let expected = if confirm {
            None
        } else {
            Some(find_term(scope, numero_termo).await?.total_previsto)
        };

        let lines = normalize_lines(numero_termo, aditivo, request);
        let total = total_of(&lines)?;

        if let Some(expected) = expected {
            let difference = total
                .checked_sub(expected)
                .ok_or_else(|| Error::Validation("submitted total is out of range".to_string()))?
                .abs();
            if difference > self.tolerance {
                tracing::info!(
                    "Rejected replace of {}/{}: total {} differs from expected {}",
                    numero_termo,
                    aditivo,
                    total,
                    expected
                );
                return Ok(ReplaceOutcome::TotalMismatch(TotalMismatch {
                    warning: true,
                    message: format!(
                        "Submitted total (R$ {:.2}) differs from the expected total (R$ {:.2}). Difference: R$ {:.2}",
                        total, expected, difference
                    ),
                    total_inserido: total,
                    total_previsto: expected,
                    registros: lines.len(),
                }));
            }
        }

        let _guard = self.locks.lock(numero_termo, aditivo).await;
        let (deleted, inserted, errors) = match self.strategy {
            ReplaceStrategy::SingleTransaction => {
                self.replace_in_one_transaction(scope, numero_termo, aditivo, &lines, actor)
                    .await
            }
            ReplaceStrategy::PerStatement => {
                self.replace_per_statement(scope, numero_termo, aditivo, &lines, actor)
                    .await
            }
        };

        let summary = ReplaceSummary::new(self.strategy, total, lines.len(), deleted, inserted, errors);
        tracing::info!(
            "Replaced lines of {}/{} for actor {}: {} (local {}/{}, secondary {}/{})",
            numero_termo,
            aditivo,
            actor,
            summary.message,
            summary.databases.local_count,
            summary.registros,
            summary.databases.secondary_count,
            summary.registros
        );
        Ok(ReplaceOutcome::Applied(summary))
    }

    async fn replace_in_one_transaction(
        &self,
        scope: &mut ReplicaScope,
        numero_termo: &str,
        aditivo: i32,
        lines: &[NewBudgetLine],
        actor: ActorId,
    ) -> ([bool; 2], [usize; 2], Vec<String>) {
        let mut statements = Vec::with_capacity(lines.len() + 1);
        statements.push(delete_lines(numero_termo, aditivo));
        statements.extend(lines.iter().map(insert_line));
        let unit = UnitOfWork::new(statements)
            .with_actor(actor)
            .with_lock(replace_lock_key(numero_termo, aditivo));

        let result = self.writer.write_unit(scope, &unit).await;
        let applied = |replica: ReplicaName| {
            if result.succeeded_on(replica) {
                lines.len()
            } else {
                0
            }
        };
        (
            [result.local.succeeded, result.secondary.succeeded],
            [applied(ReplicaName::Local), applied(ReplicaName::Secondary)],
            result.errors(),
        )
    }

    async fn replace_per_statement(
        &self,
        scope: &mut ReplicaScope,
        numero_termo: &str,
        aditivo: i32,
        lines: &[NewBudgetLine],
        actor: ActorId,
    ) -> ([bool; 2], [usize; 2], Vec<String>) {
        let deleted = self
            .writer
            .write_audited(scope, &delete_lines(numero_termo, aditivo), actor)
            .await;
        let mut errors: Vec<String> = deleted
            .errors()
            .into_iter()
            .map(|e| format!("delete: {}", e))
            .collect();

        let mut inserted = [0usize; 2];
        for (idx, line) in lines.iter().enumerate() {
            let result = self.writer.write_audited(scope, &insert_line(line), actor).await;
            for (count, replica) in inserted.iter_mut().zip(ReplicaName::ALL) {
                if result.succeeded_on(replica) {
                    *count += 1;
                }
            }
            let line_errors = result.errors();
            if !line_errors.is_empty() {
                errors.push(format!("line {}: {}", idx + 1, line_errors.join("; ")));
            }
        }

        (
            [deleted.local.succeeded, deleted.secondary.succeeded],
            inserted,
            errors,
        )
    }

    /// Change one month's amount of an expense row on both replicas
    pub async fn update_amount(
        &self,
        scope: &mut ReplicaScope,
        update: &AmountUpdate,
        actor: ActorId,
    ) -> Result<DualWriteResult> {
        if update.numero_termo.trim().is_empty() || update.rubrica.trim().is_empty() {
            return Err(Error::Validation("numero_termo and rubrica are required".to_string()));
        }
        let valor = amount_from_value(&update.valor)?
            .ok_or_else(|| Error::Validation("valor is required".to_string()))?;

        let statement = update_amount(
            update.numero_termo.trim(),
            update.aditivo,
            update.rubrica.trim(),
            update.categoria_despesa.trim(),
            update.mes,
            valor,
        );
        let _guard = self.locks.lock(update.numero_termo.trim(), update.aditivo).await;
        let result = self.writer.write_audited(scope, &statement, actor).await;

        if result.success && result.local.rows_affected == 0 && result.secondary.rows_affected == 0 {
            return Err(Error::RowNotFound(format!(
                "{}/{} {} ({}) month {}",
                update.numero_termo.trim(),
                update.aditivo,
                update.rubrica.trim(),
                update.categoria_despesa.trim(),
                update.mes
            )));
        }
        Ok(result)
    }

    pub async fn term_info(&self, scope: &mut ReplicaScope, numero_termo: &str) -> Result<TermInfo> {
        find_term(scope, numero_termo).await.map(TermInfo::from)
    }

    /// Stored lines of a revision, grouped for display
    pub async fn budget_rows(
        &self,
        scope: &mut ReplicaScope,
        numero_termo: &str,
        aditivo: i32,
    ) -> Result<Vec<BudgetRow>> {
        let lines = scope
            .acquire_readable()
            .await?
            .fetch_lines(numero_termo, aditivo)
            .await?;
        Ok(group_lines(&lines))
    }

    pub async fn categories(&self, scope: &mut ReplicaScope) -> Result<Vec<String>> {
        scope.acquire_readable().await?.fetch_categories().await
    }

    pub async fn suggested_rubrica(
        &self,
        scope: &mut ReplicaScope,
        categoria: &str,
    ) -> Result<Option<String>> {
        scope
            .acquire_readable()
            .await?
            .fetch_suggested_rubrica(categoria)
            .await
    }
}

async fn find_term(scope: &mut ReplicaScope, numero_termo: &str) -> Result<Term> {
    scope
        .acquire_readable()
        .await?
        .fetch_term(numero_termo)
        .await?
        .ok_or_else(|| Error::TermNotFound(numero_termo.to_string()))
}

fn total_of(lines: &[NewBudgetLine]) -> Result<Decimal> {
    lines.iter().try_fold(Decimal::ZERO, |total, line| {
        total
            .checked_add(line.valor)
            .ok_or_else(|| Error::Validation("submitted total is out of range".to_string()))
    })
}

/// Turn submitted rows into insertable lines, skipping blank or unusable cells
fn normalize_lines(numero_termo: &str, aditivo: i32, request: &ReplaceRequest) -> Vec<NewBudgetLine> {
    let mut lines = Vec::new();
    for expense in &request.despesas {
        let Some(rubrica) = expense
            .rubrica
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
        else {
            continue;
        };
        let quantidade = quantity_from_value(expense.quantidade.as_ref());
        let categoria = expense.categoria_despesa.as_deref().unwrap_or_default().trim();

        let mut months: Vec<(i32, Decimal)> = Vec::new();
        for (mes, raw) in &expense.valores_por_mes {
            let Ok(mes) = mes.trim().parse::<i32>() else {
                tracing::warn!("Skipping amount for invalid month '{}' of {}", mes, rubrica);
                continue;
            };
            match amount_from_value(raw) {
                Ok(Some(valor)) => months.push((mes, valor)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping month {} of {}: {}", mes, rubrica, e),
            }
        }
        months.sort_by_key(|(mes, _)| *mes);

        lines.extend(months.into_iter().map(|(mes, valor)| NewBudgetLine {
            numero_termo: numero_termo.to_string(),
            rubrica: rubrica.to_string(),
            quantidade,
            categoria_despesa: categoria.to_string(),
            valor,
            mes,
            aditivo,
        }));
    }
    lines
}
