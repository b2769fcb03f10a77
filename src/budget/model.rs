//! Budget models

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Month count used when a term has neither `meses` nor usable dates
pub const DEFAULT_MONTHS: i32 = 12;

/// A partnership term as stored in `parcerias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub numero_termo: String,
    /// Start date, `YYYY-MM-DD`
    pub inicio: Option<String>,
    /// End date, `YYYY-MM-DD`
    #[serde(rename = "final")]
    pub termino: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_previsto: Decimal,
    pub meses: Option<i32>,
}

impl Term {
    /// Number of budget months: stored value, else inclusive month span, never below 1
    pub fn month_count(&self) -> i32 {
        let months = self.meses.or_else(|| self.months_from_dates()).unwrap_or(DEFAULT_MONTHS);
        months.max(1)
    }

    fn months_from_dates(&self) -> Option<i32> {
        let parse = |s: &Option<String>| {
            s.as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        };
        let (start, end) = (parse(&self.inicio)?, parse(&self.termino)?);
        Some((end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32 + 1)
    }
}

/// Read a stored `meses` value, `None` when it is missing or not a number
pub fn parse_months(raw: Option<&str>) -> Option<i32> {
    let raw = raw?.trim();
    raw.parse::<i32>()
        .ok()
        .or_else(|| Decimal::from_str(raw).ok()?.trunc().to_i32())
}

/// Term summary returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermInfo {
    pub numero_termo: String,
    pub inicio: Option<String>,
    #[serde(rename = "final")]
    pub termino: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_previsto: Decimal,
    pub meses: i32,
}

impl From<Term> for TermInfo {
    fn from(term: Term) -> Self {
        let meses = term.month_count();
        Self {
            numero_termo: term.numero_termo,
            inicio: term.inicio,
            termino: term.termino,
            total_previsto: term.total_previsto,
            meses,
        }
    }
}

/// One stored row of `parcerias_despesas`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub id: i64,
    pub numero_termo: String,
    pub rubrica: String,
    pub quantidade: Option<i32>,
    pub categoria_despesa: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub valor: Decimal,
    pub mes: i32,
    pub aditivo: i32,
}

/// A normalised line ready to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewBudgetLine {
    pub numero_termo: String,
    pub rubrica: String,
    pub quantidade: Option<i32>,
    pub categoria_despesa: String,
    pub valor: Decimal,
    pub mes: i32,
    pub aditivo: i32,
}

/// One expense row as submitted by a client, amounts keyed by month
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseInput {
    #[serde(default)]
    pub rubrica: Option<String>,
    #[serde(default)]
    pub quantidade: Option<Value>,
    #[serde(default)]
    pub categoria_despesa: Option<String>,
    #[serde(default)]
    pub valores_por_mes: BTreeMap<String, Value>,
}

/// Request to replace every line of a term revision
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplaceRequest {
    #[serde(default)]
    pub numero_termo: String,
    #[serde(default)]
    pub despesas: Vec<ExpenseInput>,
    #[serde(default)]
    pub aditivo: i32,
}

/// Request to change the amount of one month of one expense row
#[derive(Debug, Clone, Deserialize)]
pub struct AmountUpdate {
    pub numero_termo: String,
    #[serde(default)]
    pub aditivo: i32,
    pub rubrica: String,
    #[serde(default)]
    pub categoria_despesa: String,
    pub mes: i32,
    pub valor: Value,
}

/// Stored lines regrouped the way clients submit them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetRow {
    pub rubrica: String,
    pub quantidade: i32,
    pub categoria_despesa: String,
    pub valores_por_mes: BTreeMap<String, f64>,
}

/// Group lines by `rubrica|categoria|quantidade`, keeping first-seen order
pub fn group_lines(lines: &[BudgetLine]) -> Vec<BudgetRow> {
    let mut rows: Vec<BudgetRow> = Vec::new();
    for line in lines {
        let quantidade = line.quantidade.unwrap_or(1);
        let pos = rows.iter().position(|r| {
            r.rubrica == line.rubrica
                && r.categoria_despesa == line.categoria_despesa
                && r.quantidade == quantidade
        });
        let row = match pos {
            Some(i) => &mut rows[i],
            None => {
                rows.push(BudgetRow {
                    rubrica: line.rubrica.clone(),
                    quantidade,
                    categoria_despesa: line.categoria_despesa.clone(),
                    valores_por_mes: BTreeMap::new(),
                });
                let last = rows.len() - 1;
                &mut rows[last]
            }
        };
        row.valores_por_mes
            .insert(line.mes.to_string(), line.valor.to_f64().unwrap_or_default());
    }
    rows
}
