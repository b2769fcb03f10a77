//! Write Statements
//!
//! A parameterised mutating command. The same value is handed to both
//! replicas, so it is immutable once built.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

/// A bound parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Decimal(Decimal),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Coarse classification of a statement by its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    /// CREATE / DROP / ALTER
    Schema,
    Other,
}

/// A mutating SQL command plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteStatement {
    sql: String,
    params: Vec<SqlValue>,
}

impl WriteStatement {
    /// Start a statement with no parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter (`$1`, `$2`, ...)
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn kind(&self) -> StatementKind {
        let keyword = self
            .sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "CREATE" | "DROP" | "ALTER" => StatementKind::Schema,
            _ => StatementKind::Other,
        }
    }

    /// Checksum over text and parameters, for correlating log lines across replicas
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.sql.as_bytes());
        for param in &self.params {
            hasher.update(format!("{:?}", param).as_bytes());
        }
        hasher.finalize()
    }
}

impl fmt::Display for WriteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flat = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.len() > 80 {
            let cut = (0..=80).rev().find(|i| flat.is_char_boundary(*i)).unwrap_or(0);
            write!(f, "{}... ({} params)", &flat[..cut], self.params.len())
        } else {
            write!(f, "{} ({} params)", flat, self.params.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_leading_keyword() {
        assert_eq!(WriteStatement::new("  insert into t values (1)").kind(), StatementKind::Insert);
        assert_eq!(WriteStatement::new("UPDATE t SET a = 1").kind(), StatementKind::Update);
        assert_eq!(WriteStatement::new("DELETE FROM t").kind(), StatementKind::Delete);
        assert_eq!(WriteStatement::new("DROP TRIGGER x ON t").kind(), StatementKind::Schema);
        assert_eq!(WriteStatement::new("SELECT 1").kind(), StatementKind::Other);
        assert_eq!(WriteStatement::new("").kind(), StatementKind::Other);
    }

    #[test]
    fn test_bind_order_and_option() {
        let stmt = WriteStatement::new("INSERT INTO t (a, b, c) VALUES ($1, $2, $3)")
            .bind("x")
            .bind(None::<i32>)
            .bind(Decimal::new(1050, 2));
        assert_eq!(
            stmt.params(),
            &[
                SqlValue::Text("x".into()),
                SqlValue::Null,
                SqlValue::Decimal(Decimal::new(1050, 2))
            ]
        );
    }

    #[test]
    fn test_fingerprint_depends_on_params() {
        let a = WriteStatement::new("DELETE FROM t WHERE id = $1").bind(1i64);
        let b = WriteStatement::new("DELETE FROM t WHERE id = $1").bind(2i64);
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_display_flattens_whitespace() {
        let stmt = WriteStatement::new("DELETE FROM t\n    WHERE id = $1").bind(1i64);
        assert_eq!(stmt.to_string(), "DELETE FROM t WHERE id = $1 (1 params)");
    }
}
