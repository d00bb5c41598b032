use common::{Result, TableSelection};
use tracing::warn;

use crate::store::SyncStore;

/// A table cleared for replication: its name, single-column primary key, and
/// ordinary columns in declaration order.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub pk_col: String,
    pub columns: Vec<String>,
}

/// Prepares a database endpoint for replication: creates `change_log` and
/// `conflict_log` if absent, then resolves the pair's table selection into
/// concrete, triggerable tables.
pub struct SchemaBootstrapper;

impl SchemaBootstrapper {
    /// Ensure both audit tables exist. Idempotent — safe to call on every
    /// scheduler tick.
    pub async fn ensure_schema(store: &dyn SyncStore) -> Result<()> {
        store.ensure_change_log().await?;
        store.ensure_conflict_log().await?;
        Ok(())
    }

    /// Resolve a pair's table selection into `TableInfo`s, skipping any
    /// table without a single-column primary key (composite keys are
    /// unsupported) and logging why.
    pub async fn resolve_tables(
        store: &dyn SyncStore,
        selection: &TableSelection,
    ) -> Result<Vec<TableInfo>> {
        let candidates = match selection.explicit_tables() {
            Some(tables) => tables,
            None => store.list_user_tables().await?,
        };

        let mut infos = Vec::with_capacity(candidates.len());
        for table in candidates {
            match store.primary_key_of(&table).await? {
                Some(pk_col) => {
                    let columns = store.columns_of(&table).await?;
                    infos.push(TableInfo {
                        name: table,
                        pk_col,
                        columns,
                    });
                }
                None => {
                    warn!(table = %table, "skipping table without a single-column primary key");
                }
            }
        }
        Ok(infos)
    }
}
