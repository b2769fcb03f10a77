//! Audit trigger lifecycle
//!
//! DDL for the audit table and the row-level trigger on the budget table.
//! The statements are plain [`WriteStatement`]s so they go through the
//! coordinator like any other write and land on both replicas.

use crate::config::TriggerMode;
use crate::coordinator::WriteStatement;
use crate::error::{Error, Result};

pub const AUDIT_TABLE: &str = "parcerias_despesas_auditoria";
pub const TRIGGER_NAME: &str = "parcerias_despesas_audit_trigger";
pub const FUNCTION_NAME: &str = "parcerias_despesas_audit()";

const CREATE_AUDIT_TABLE: &str = "CREATE TABLE IF NOT EXISTS parcerias_despesas_auditoria (
    id BIGSERIAL PRIMARY KEY,
    parcerias_despesas_id BIGINT NOT NULL,
    usuario_id BIGINT NOT NULL,
    acao VARCHAR(10) NOT NULL CHECK (acao IN ('INSERT', 'UPDATE', 'DELETE')),
    dados_anteriores JSONB,
    dados_novos JSONB,
    data_modificacao TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const CREATE_AUDIT_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_auditoria_data \
     ON parcerias_despesas_auditoria (data_modificacao DESC)";

// Strict: a missing actor aborts the mutating statement
const RESOLVE_ACTOR_STRICT: &str = "v_usuario_id := NULLIF(current_setting('{setting}', true), '')::BIGINT;
    IF v_usuario_id IS NULL THEN
        RAISE EXCEPTION '{setting} is not set; bind the acting user before DML';
    END IF;";

const RESOLVE_ACTOR_LENIENT: &str =
    "v_usuario_id := COALESCE(NULLIF(current_setting('{setting}', true), '')::BIGINT, 1);";

const FUNCTION_BODY: &str = "CREATE OR REPLACE FUNCTION parcerias_despesas_audit()
RETURNS TRIGGER AS $$
DECLARE
    v_usuario_id BIGINT;
BEGIN
    {resolve}

    IF TG_OP = 'DELETE' THEN
        INSERT INTO parcerias_despesas_auditoria
            (parcerias_despesas_id, usuario_id, acao, dados_anteriores, dados_novos)
        VALUES (OLD.id, v_usuario_id, 'DELETE', to_jsonb(OLD), NULL);
    ELSIF TG_OP = 'INSERT' THEN
        INSERT INTO parcerias_despesas_auditoria
            (parcerias_despesas_id, usuario_id, acao, dados_anteriores, dados_novos)
        VALUES (NEW.id, v_usuario_id, 'INSERT', NULL, to_jsonb(NEW));
    ELSE
        INSERT INTO parcerias_despesas_auditoria
            (parcerias_despesas_id, usuario_id, acao, dados_anteriores, dados_novos)
        VALUES (NEW.id, v_usuario_id, 'UPDATE', to_jsonb(OLD), to_jsonb(NEW));
    END IF;
    RETURN NULL;
END;
$$ LANGUAGE plpgsql";

const CREATE_TRIGGER: &str = "CREATE TRIGGER parcerias_despesas_audit_trigger
    AFTER INSERT OR UPDATE OR DELETE ON parcerias_despesas
    FOR EACH ROW EXECUTE FUNCTION parcerias_despesas_audit()";

const DROP_TRIGGER: &str =
    "DROP TRIGGER IF EXISTS parcerias_despesas_audit_trigger ON parcerias_despesas";

const DROP_FUNCTION: &str = "DROP FUNCTION IF EXISTS parcerias_despesas_audit()";

/// Reject setting names that could not be embedded in the function body verbatim
fn check_setting(setting: &str) -> Result<()> {
    let valid = setting.split('.').count() == 2
        && setting
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "actor setting '{}' must look like 'prefix.name'",
            setting
        )))
    }
}

/// Statements that create the audit table and (re)install the trigger
pub fn install_statements(setting: &str, mode: TriggerMode) -> Result<Vec<WriteStatement>> {
    check_setting(setting)?;
    let resolve = match mode {
        TriggerMode::Strict => RESOLVE_ACTOR_STRICT,
        TriggerMode::Lenient => RESOLVE_ACTOR_LENIENT,
    }
    .replace("{setting}", setting);

    Ok(vec![
        WriteStatement::new(CREATE_AUDIT_TABLE),
        WriteStatement::new(CREATE_AUDIT_INDEX),
        WriteStatement::new(DROP_TRIGGER),
        WriteStatement::new(FUNCTION_BODY.replace("{resolve}", &resolve)),
        WriteStatement::new(CREATE_TRIGGER),
    ])
}

/// Statements that remove the trigger and its function; audit history is kept
pub fn remove_statements() -> Vec<WriteStatement> {
    vec![WriteStatement::new(DROP_TRIGGER), WriteStatement::new(DROP_FUNCTION)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::DEFAULT_ACTOR_SETTING;
    use crate::config::{AuditConfig, CoordinatorConfig};
    use crate::coordinator::{DualWriter, StatementKind, UnitOfWork};
    use crate::replica::{MemoryCluster, ReplicaScope};

    #[test]
    fn test_install_embeds_setting_and_mode() {
        let strict = install_statements("app.current_user_id", TriggerMode::Strict).unwrap();
        let function = strict[3].sql();
        assert!(function.contains("current_setting('app.current_user_id', true)"));
        assert!(function.contains("RAISE EXCEPTION"));
        assert!(strict.iter().all(|s| s.kind() == StatementKind::Schema));

        let lenient = install_statements("app.current_user_id", TriggerMode::Lenient).unwrap();
        assert!(!lenient[3].sql().contains("RAISE EXCEPTION"));
        assert!(lenient[3].sql().contains("COALESCE"));
    }

    #[test]
    fn test_install_rejects_unsafe_setting() {
        assert!(install_statements("app.user'; DROP TABLE x; --", TriggerMode::Strict).is_err());
        assert!(install_statements("nodot", TriggerMode::Strict).is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_on_both_replicas() {
        let cluster = MemoryCluster::new();
        let writer = DualWriter::new(&CoordinatorConfig::default(), &AuditConfig::default());
        let mut scope = ReplicaScope::new(cluster.connector());

        let removed = writer
            .write_unit(&mut scope, &UnitOfWork::new(remove_statements()))
            .await;
        assert!(removed.success);
        assert_eq!(cluster.local().trigger().await, None);
        assert_eq!(cluster.secondary().trigger().await, None);

        let install = install_statements(DEFAULT_ACTOR_SETTING, TriggerMode::Lenient).unwrap();
        let installed = writer.write_unit(&mut scope, &UnitOfWork::new(install)).await;
        assert!(installed.success);
        assert_eq!(cluster.local().trigger().await, Some(TriggerMode::Lenient));

        scope.release().await;
    }
}
