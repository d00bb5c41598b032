use common::{EngineError, NodeId, Result};
use db::DbSession;

use crate::schema::TableInfo;
use crate::types::Operation;

const TRIGGER_OPS: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

/// Generates and installs the `AFTER INSERT/UPDATE/DELETE` triggers that
/// feed `change_log` (§4.3). Pure SQL-generation functions are kept
/// separate from the install step so the generated statements can be
/// unit-tested without a database.
pub struct TriggerSynthesizer;

impl TriggerSynthesizer {
    pub fn trigger_name(table: &str, op: Operation) -> String {
        format!("trg_{}_{}_change_log", table, op.as_sql().to_lowercase())
    }

    pub fn drop_sql(table: &str, op: Operation) -> String {
        format!("DROP TRIGGER IF EXISTS `{}`", Self::trigger_name(table, op))
    }

    /// The row reference a trigger body reads from: `OLD` for a row about
    /// to disappear, `NEW` otherwise.
    fn row_ref(op: Operation) -> &'static str {
        match op {
            Operation::Delete => "OLD",
            Operation::Insert | Operation::Update => "NEW",
        }
    }

    pub fn create_sql(table: &TableInfo, op: Operation, node_id: &NodeId) -> String {
        let row_ref = Self::row_ref(op);
        let mut json_pairs = vec![format!("'{}', {}.`{}`", table.pk_col, row_ref, table.pk_col)];
        json_pairs.extend(
            table
                .columns
                .iter()
                .filter(|c| c.as_str() != table.pk_col)
                .map(|c| format!("'{}', {}.`{}`", c, row_ref, c)),
        );

        format!(
            "CREATE TRIGGER `{}` AFTER {} ON `{}` FOR EACH ROW \
             INSERT INTO change_log (table_name, operation, row_pk, row_data, source_node, applied_nodes) \
             VALUES ('{}', '{}', {}.`{}`, JSON_OBJECT({}), '{}', JSON_ARRAY())",
            Self::trigger_name(&table.name, op),
            op.as_sql(),
            table.name,
            table.name,
            op.as_sql(),
            row_ref,
            table.pk_col,
            json_pairs.join(", "),
            node_id.as_str(),
        )
    }

    /// Drop-then-create all three triggers for `table`. Idempotent — safe
    /// to call on every bootstrap and on `rebuild_triggers` (§4.8).
    pub async fn install(session: &dyn DbSession, table: &TableInfo, node_id: &NodeId) -> Result<()> {
        for op in TRIGGER_OPS {
            session
                .exec(&Self::drop_sql(&table.name, op), &[])
                .await
                .map_err(|e| EngineError::TriggerInstall(e.to_string()))?;
            session
                .exec(&Self::create_sql(table, op, node_id), &[])
                .await
                .map_err(|e| EngineError::TriggerInstall(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn install_all(
        session: &dyn DbSession,
        tables: &[TableInfo],
        node_id: &NodeId,
    ) -> Result<()> {
        for table in tables {
            Self::install(session, table, node_id).await?;
        }
        Ok(())
    }
}
