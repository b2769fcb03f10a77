//! SQL for the budget table
//!
//! Builders for the mutating statements the coordinator sends to both
//! replicas, plus the read queries used by the PostgreSQL backend.

use rust_decimal::Decimal;

use super::NewBudgetLine;
use crate::coordinator::WriteStatement;

pub const DELETE_LINES_SQL: &str =
    "DELETE FROM parcerias_despesas WHERE numero_termo = $1 AND COALESCE(aditivo, 0) = $2";

pub const INSERT_LINE_SQL: &str = "INSERT INTO parcerias_despesas \
     (numero_termo, rubrica, quantidade, categoria_despesa, valor, mes, aditivo) \
     VALUES ($1, $2, $3, $4, $5, $6, $7)";

// Rows are addressed by their natural key; ids differ between replicas
pub const UPDATE_AMOUNT_SQL: &str = "UPDATE parcerias_despesas SET valor = $1 \
     WHERE numero_termo = $2 AND COALESCE(aditivo, 0) = $3 AND rubrica = $4 \
     AND COALESCE(categoria_despesa, '') = $5 AND mes = $6";

pub const SELECT_TERM_SQL: &str = "SELECT numero_termo, inicio::TEXT AS inicio, \"final\"::TEXT AS termino, \
     COALESCE(total_previsto, 0)::NUMERIC AS total_previsto, meses::TEXT AS meses \
     FROM parcerias WHERE numero_termo = $1";

pub const SELECT_LINES_SQL: &str = "SELECT id::INT8 AS id, numero_termo, COALESCE(rubrica, '') AS rubrica, \
     quantidade::INT4 AS quantidade, COALESCE(categoria_despesa, '') AS categoria_despesa, \
     valor::NUMERIC AS valor, mes::INT4 AS mes, COALESCE(aditivo, 0)::INT4 AS aditivo \
     FROM parcerias_despesas WHERE numero_termo = $1 AND COALESCE(aditivo, 0) = $2 ORDER BY id";

pub const SELECT_CATEGORIES_SQL: &str = "SELECT DISTINCT categoria_despesa FROM parcerias_despesas \
     WHERE categoria_despesa IS NOT NULL AND categoria_despesa <> '' ORDER BY categoria_despesa";

pub const SELECT_SUGGESTED_RUBRICA_SQL: &str = "SELECT rubrica FROM parcerias_despesas \
     WHERE categoria_despesa = $1 AND rubrica IS NOT NULL AND rubrica <> '' \
     GROUP BY rubrica ORDER BY COUNT(*) DESC, rubrica LIMIT 1";

/// Remove every line of a term revision
pub fn delete_lines(numero_termo: &str, aditivo: i32) -> WriteStatement {
    WriteStatement::new(DELETE_LINES_SQL)
        .bind(numero_termo)
        .bind(aditivo)
}

pub fn insert_line(line: &NewBudgetLine) -> WriteStatement {
    WriteStatement::new(INSERT_LINE_SQL)
        .bind(line.numero_termo.as_str())
        .bind(line.rubrica.as_str())
        .bind(line.quantidade)
        .bind(line.categoria_despesa.as_str())
        .bind(line.valor)
        .bind(line.mes)
        .bind(line.aditivo)
}

/// Set the amount of one month of one expense row
pub fn update_amount(
    numero_termo: &str,
    aditivo: i32,
    rubrica: &str,
    categoria_despesa: &str,
    mes: i32,
    valor: Decimal,
) -> WriteStatement {
    WriteStatement::new(UPDATE_AMOUNT_SQL)
        .bind(valor)
        .bind(numero_termo)
        .bind(aditivo)
        .bind(rubrica)
        .bind(categoria_despesa)
        .bind(mes)
}

/// Advisory lock key serialising replaces of one term revision
pub fn replace_lock_key(numero_termo: &str, aditivo: i32) -> i64 {
    i64::from(crc32fast::hash(format!("{}:{}", numero_termo, aditivo).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{SqlValue, StatementKind};

    #[test]
    fn test_delete_binds_term_and_revision() {
        let stmt = delete_lines("T-001", 2);
        assert_eq!(stmt.kind(), StatementKind::Delete);
        assert_eq!(stmt.params(), &[SqlValue::Text("T-001".into()), SqlValue::Int(2)]);
    }

    #[test]
    fn test_insert_binds_seven_params() {
        let stmt = insert_line(&NewBudgetLine {
            numero_termo: "T-001".into(),
            rubrica: "Pessoal".into(),
            quantidade: None,
            categoria_despesa: String::new(),
            valor: Decimal::new(100, 0),
            mes: 1,
            aditivo: 0,
        });
        assert_eq!(stmt.params().len(), 7);
        assert_eq!(stmt.params()[2], SqlValue::Null);
    }

    #[test]
    fn test_lock_key_is_stable_per_revision() {
        assert_eq!(replace_lock_key("T-001", 0), replace_lock_key("T-001", 0));
        assert_ne!(replace_lock_key("T-001", 0), replace_lock_key("T-001", 1));
        assert!(replace_lock_key("T-001", 0) >= 0);
    }
}
