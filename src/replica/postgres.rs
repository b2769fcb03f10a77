//! PostgreSQL Replica
//!
//! One dedicated `PgConnection` per replica per scope. Transaction control
//! is sent as plain BEGIN / COMMIT / ROLLBACK so the coordinator decides
//! exactly when each step happens.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Connection, Executor, PgConnection, Postgres, Row};

use super::{ReplicaConnection, ReplicaConnector, ReplicaName};
use crate::audit::{ActorActivity, AuditAction, AuditFilter, AuditRecord, AuditStats, AUDIT_STATS_SQL, TOP_ACTORS_SQL};
use crate::budget::statements::{
    SELECT_CATEGORIES_SQL, SELECT_LINES_SQL, SELECT_SUGGESTED_RUBRICA_SQL, SELECT_TERM_SQL,
};
use crate::budget::{parse_months, BudgetLine, Term};
use crate::config::{DatabaseConfig, ReplicasConfig};
use crate::coordinator::{SqlValue, WriteStatement};
use crate::error::{Error, Result};

/// Opens connections to the configured replicas
pub struct PgConnector {
    local: DatabaseConfig,
    secondary: DatabaseConfig,
}

impl PgConnector {
    pub fn new(replicas: &ReplicasConfig) -> Self {
        Self {
            local: replicas.local.clone(),
            secondary: replicas.secondary.clone(),
        }
    }

    fn config(&self, replica: ReplicaName) -> &DatabaseConfig {
        match replica {
            ReplicaName::Local => &self.local,
            ReplicaName::Secondary => &self.secondary,
        }
    }
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .application_name("dualwrite")
        .ssl_mode(if config.require_tls {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        })
}

#[async_trait]
impl ReplicaConnector for PgConnector {
    async fn connect(&self, replica: ReplicaName) -> Result<Box<dyn ReplicaConnection>> {
        let config = self.config(replica);
        let options = connect_options(config);

        let conn = tokio::time::timeout(config.connect_timeout(), PgConnection::connect_with(&options))
            .await
            .map_err(|_| Error::ReplicaUnavailable {
                replica,
                reason: format!(
                    "connection to {}:{} timed out after {}s",
                    config.host, config.port, config.connect_timeout_secs
                ),
            })?
            .map_err(|e| Error::ReplicaUnavailable {
                replica,
                reason: e.to_string(),
            })?;

        tracing::debug!("Opened connection to replica {} at {}:{}", replica, config.host, config.port);
        Ok(Box::new(PgReplicaConnection { replica, conn }))
    }
}

/// Live connection to one PostgreSQL replica
pub struct PgReplicaConnection {
    replica: ReplicaName,
    conn: PgConnection,
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            // Untyped NULLs only occur for integer columns
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Decimal(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn audit_record(row: &PgRow) -> Result<AuditRecord> {
    let action: String = row.try_get("acao")?;
    Ok(AuditRecord {
        id: row.try_get("id")?,
        row_id: row.try_get("parcerias_despesas_id")?,
        actor_id: row.try_get("usuario_id")?,
        action: action.parse::<AuditAction>()?,
        before: row.try_get("dados_anteriores")?,
        after: row.try_get("dados_novos")?,
        modified_at: row.try_get("data_modificacao")?,
        actor_email: row.try_get("email")?,
        numero_termo: row.try_get("numero_termo")?,
    })
}

#[async_trait]
impl ReplicaConnection for PgReplicaConnection {
    fn replica(&self) -> ReplicaName {
        self.replica
    }

    async fn ping(&mut self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        (&mut self.conn).execute("BEGIN").await?;
        Ok(())
    }

    async fn set_local(&mut self, setting: &str, value: &str) -> Result<()> {
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(setting)
            .bind(value)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn advisory_lock(&mut self, key: i64) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64> {
        let result = bind_params(sqlx::query(statement.sql()), statement.params())
            .execute(&mut self.conn)
            .await
            .map_err(|e| Error::QueryExecution(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<()> {
        (&mut self.conn).execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        (&mut self.conn).execute("ROLLBACK").await?;
        Ok(())
    }

    async fn fetch_term(&mut self, numero_termo: &str) -> Result<Option<Term>> {
        let row = sqlx::query(SELECT_TERM_SQL)
            .bind(numero_termo)
            .fetch_optional(&mut self.conn)
            .await?;

        row.map(|row| {
            Ok::<_, Error>(Term {
                numero_termo: row.try_get("numero_termo")?,
                inicio: row.try_get("inicio")?,
                termino: row.try_get("termino")?,
                total_previsto: row.try_get("total_previsto")?,
                meses: parse_months(row.try_get::<Option<String>, _>("meses")?.as_deref()),
            })
        })
        .transpose()
    }

    async fn fetch_lines(&mut self, numero_termo: &str, aditivo: i32) -> Result<Vec<BudgetLine>> {
        let rows = sqlx::query(SELECT_LINES_SQL)
            .bind(numero_termo)
            .bind(aditivo)
            .fetch_all(&mut self.conn)
            .await?;

        rows.iter()
            .map(|row| {
                Ok::<_, Error>(BudgetLine {
                    id: row.try_get("id")?,
                    numero_termo: row.try_get("numero_termo")?,
                    rubrica: row.try_get("rubrica")?,
                    quantidade: row.try_get("quantidade")?,
                    categoria_despesa: row.try_get("categoria_despesa")?,
                    valor: row.try_get("valor")?,
                    mes: row.try_get("mes")?,
                    aditivo: row.try_get("aditivo")?,
                })
            })
            .collect()
    }

    async fn fetch_categories(&mut self) -> Result<Vec<String>> {
        let rows = sqlx::query(SELECT_CATEGORIES_SQL)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Error::from))
            .collect()
    }

    async fn fetch_suggested_rubrica(&mut self, categoria: &str) -> Result<Option<String>> {
        let row = sqlx::query(SELECT_SUGGESTED_RUBRICA_SQL)
            .bind(categoria)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>(0)).transpose()?)
    }

    async fn fetch_audit(&mut self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let (sql, params) = filter.to_sql();
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(audit_record).collect()
    }

    async fn fetch_audit_stats(&mut self) -> Result<AuditStats> {
        let row = sqlx::query(AUDIT_STATS_SQL).fetch_one(&mut self.conn).await?;
        let top = sqlx::query(TOP_ACTORS_SQL).fetch_all(&mut self.conn).await?;

        let top_actors = top
            .iter()
            .map(|r| {
                Ok(ActorActivity {
                    email: r.try_get("email")?,
                    actions: r.try_get("actions")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AuditStats {
            total: row.try_get("total")?,
            inserts: row.try_get("inserts")?,
            updates: row.try_get("updates")?,
            deletes: row.try_get("deletes")?,
            distinct_actors: row.try_get("actors")?,
            distinct_rows: row.try_get("row_count")?,
            first_modification: row.try_get("first_modification")?,
            last_modification: row.try_get("last_modification")?,
            top_actors,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DEFAULT_ACTOR_SETTING;
    use std::str::FromStr;

    async fn connect(var: &str) -> PgReplicaConnection {
        let url = std::env::var(var).unwrap_or_else(|_| panic!("{} must be set", var));
        let options = PgConnectOptions::from_str(&url).unwrap();
        PgReplicaConnection {
            replica: ReplicaName::Local,
            conn: PgConnection::connect_with(&options).await.unwrap(),
        }
    }

    async fn current_actor(conn: &mut PgReplicaConnection) -> Option<String> {
        sqlx::query("SELECT NULLIF(current_setting($1, true), '')")
            .bind(DEFAULT_ACTOR_SETTING)
            .fetch_one(&mut conn.conn)
            .await
            .unwrap()
            .try_get(0)
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_actor_setting_is_transaction_local() {
        let mut conn = connect("DATABASE_URL").await;

        conn.begin().await.unwrap();
        conn.set_local(DEFAULT_ACTOR_SETTING, "42").await.unwrap();
        assert_eq!(current_actor(&mut conn).await.as_deref(), Some("42"));
        conn.commit().await.unwrap();

        conn.begin().await.unwrap();
        assert_eq!(current_actor(&mut conn).await, None);
        conn.rollback().await.unwrap();

        Box::new(conn).close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_rollback_discards_statement() {
        let mut conn = connect("DATABASE_URL").await;
        (&mut conn.conn)
            .execute("CREATE TEMP TABLE dualwrite_probe (v INT8)")
            .await
            .unwrap();

        conn.begin().await.unwrap();
        let rows = conn
            .execute(&WriteStatement::new("INSERT INTO dualwrite_probe (v) VALUES ($1)").bind(7i64))
            .await
            .unwrap();
        assert_eq!(rows, 1);
        conn.rollback().await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) FROM dualwrite_probe")
            .fetch_one(&mut conn.conn)
            .await
            .unwrap()
            .get(0);
        assert_eq!(count, 0);
    }
}
