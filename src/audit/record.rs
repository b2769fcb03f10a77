//! Audit records as written by the database trigger

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Snapshot fields that never count as a change
const IGNORED_FIELDS: &[&str] = &["id", "criado_em"];

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(AuditAction::Insert),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(Error::Validation(format!("unknown audit action '{}'", other))),
        }
    }
}

/// One audit row, joined with the acting user's email and the row's term
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(rename = "parcerias_despesas_id")]
    pub row_id: i64,
    #[serde(rename = "usuario_id")]
    pub actor_id: i64,
    #[serde(rename = "acao")]
    pub action: AuditAction,
    #[serde(rename = "dados_anteriores")]
    pub before: Option<Value>,
    #[serde(rename = "dados_novos")]
    pub after: Option<Value>,
    #[serde(rename = "data_modificacao")]
    pub modified_at: DateTime<Utc>,
    #[serde(rename = "usuario_email")]
    pub actor_email: Option<String>,
    pub numero_termo: Option<String>,
}

impl AuditRecord {
    /// Field-level changes between the before and after snapshots
    pub fn changes(&self) -> Vec<FieldChange> {
        diff_snapshots(self.before.as_ref(), self.after.as_ref())
    }
}

/// A single changed field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Compare two JSON object snapshots field by field.
///
/// A missing snapshot (insert or delete) reports every field of the other.
pub fn diff_snapshots(before: Option<&Value>, after: Option<&Value>) -> Vec<FieldChange> {
    let before = before.and_then(Value::as_object);
    let after = after.and_then(Value::as_object);

    let fields: BTreeSet<&String> = before
        .into_iter()
        .flat_map(|o| o.keys())
        .chain(after.into_iter().flat_map(|o| o.keys()))
        .filter(|k| !IGNORED_FIELDS.contains(&k.as_str()))
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let old = before.and_then(|o| o.get(field)).cloned();
            let new = after.and_then(|o| o.get(field)).cloned();
            (old != new).then(|| FieldChange {
                field: field.clone(),
                before: old,
                after: new,
            })
        })
        .collect()
}

/// Actions per user, for the statistics view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorActivity {
    pub email: String,
    pub actions: i64,
}

/// Aggregate figures over the whole audit table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub inserts: i64,
    pub updates: i64,
    pub deletes: i64,
    pub distinct_actors: i64,
    pub distinct_rows: i64,
    pub first_modification: Option<DateTime<Utc>>,
    pub last_modification: Option<DateTime<Utc>>,
    /// Five most active users
    pub top_actors: Vec<ActorActivity>,
}
