//! Audit Queries
//!
//! Filter builder for browsing the audit table. Every user-supplied value
//! becomes a `$n` parameter.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use super::{AuditAction, AuditRecord};
use crate::coordinator::SqlValue;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 1000;

const SELECT_AUDIT: &str = "SELECT a.id::INT8 AS id, \
     a.parcerias_despesas_id::INT8 AS parcerias_despesas_id, a.usuario_id::INT8 AS usuario_id, \
     a.acao::TEXT AS acao, a.dados_anteriores::JSONB AS dados_anteriores, \
     a.dados_novos::JSONB AS dados_novos, a.data_modificacao::TIMESTAMPTZ AS data_modificacao, \
     u.email::TEXT AS email, d.numero_termo::TEXT AS numero_termo \
     FROM parcerias_despesas_auditoria a \
     LEFT JOIN usuarios u ON u.id = a.usuario_id \
     LEFT JOIN parcerias_despesas d ON d.id = a.parcerias_despesas_id \
     WHERE 1=1";

/// Aggregate counters over the audit table
pub const AUDIT_STATS_SQL: &str = "SELECT COUNT(*)::BIGINT AS total, \
     COUNT(DISTINCT usuario_id)::BIGINT AS actors, \
     COUNT(DISTINCT parcerias_despesas_id)::BIGINT AS row_count, \
     COUNT(*) FILTER (WHERE acao = 'INSERT')::BIGINT AS inserts, \
     COUNT(*) FILTER (WHERE acao = 'UPDATE')::BIGINT AS updates, \
     COUNT(*) FILTER (WHERE acao = 'DELETE')::BIGINT AS deletes, \
     MIN(data_modificacao)::TIMESTAMPTZ AS first_modification, \
     MAX(data_modificacao)::TIMESTAMPTZ AS last_modification \
     FROM parcerias_despesas_auditoria";

/// Five most active users
pub const TOP_ACTORS_SQL: &str = "SELECT u.email::TEXT AS email, COUNT(*)::BIGINT AS actions \
     FROM parcerias_despesas_auditoria a \
     JOIN usuarios u ON u.id = a.usuario_id \
     GROUP BY u.email \
     ORDER BY actions DESC, u.email \
     LIMIT 5";

/// Criteria for selecting audit rows; all of them are optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    email: Option<String>,
    action: Option<AuditAction>,
    numero_termo: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive substring of the acting user's email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into()).filter(|e: &String| !e.trim().is_empty());
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Case-insensitive substring of the term number
    pub fn with_term(mut self, numero_termo: impl Into<String>) -> Self {
        self.numero_termo = Some(numero_termo.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Inclusive lower bound on the modification time
    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    /// Inclusive upper bound on the modification time
    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    /// From the first instant of `day`, UTC
    pub fn since_day(self, day: NaiveDate) -> Self {
        self.since(day.and_time(NaiveTime::MIN).and_utc())
    }

    /// Through the last instant of `day`, UTC
    pub fn until_day(self, day: NaiveDate) -> Self {
        let next = day.and_time(NaiveTime::MIN).and_utc() + Duration::days(1);
        self.until(next - Duration::microseconds(1))
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Effective row limit, clamped to `1..=MAX_LIMIT`
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Build the SELECT and its parameters
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::from(SELECT_AUDIT);
        let mut params = Vec::new();

        let mut push = |clause: &str, value: SqlValue, sql: &mut String| {
            params.push(value);
            sql.push_str(&clause.replace("{}", &format!("${}", params.len())));
        };

        if let Some(email) = &self.email {
            push(" AND u.email ILIKE {}", like(email), &mut sql);
        }
        if let Some(action) = self.action {
            push(" AND a.acao = {}", action.as_str().into(), &mut sql);
        }
        if let Some(termo) = &self.numero_termo {
            push(" AND d.numero_termo ILIKE {}", like(termo), &mut sql);
        }
        if let Some(since) = self.since {
            push(" AND a.data_modificacao >= {}::timestamptz", since.to_rfc3339().into(), &mut sql);
        }
        if let Some(until) = self.until {
            push(" AND a.data_modificacao <= {}::timestamptz", until.to_rfc3339().into(), &mut sql);
        }
        push(
            " ORDER BY a.data_modificacao DESC, a.id DESC LIMIT {}",
            SqlValue::Int(self.limit()),
            &mut sql,
        );

        (sql, params)
    }

    /// Evaluate the filter in memory, ignoring the limit
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn contains(haystack: Option<&str>, needle: &str) -> bool {
            haystack
                .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false)
        }

        self.email
            .as_deref()
            .map_or(true, |e| contains(record.actor_email.as_deref(), e))
            && self.action.map_or(true, |a| a == record.action)
            && self
                .numero_termo
                .as_deref()
                .map_or(true, |t| contains(record.numero_termo.as_deref(), t))
            && self.since.map_or(true, |s| record.modified_at >= s)
            && self.until.map_or(true, |u| record.modified_at <= u)
    }
}

fn like(fragment: &str) -> SqlValue {
    let escaped = fragment
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    SqlValue::Text(format!("%{}%", escaped))
}
