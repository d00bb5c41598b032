use common::{EngineError, Result};

use crate::schema::TableInfo;
use crate::store::TargetTableStore;
use crate::types::{ChangeRecord, Operation};

/// Applies one `ChangeRecord` to the target table (§4.6). Insert and update
/// both upsert — the trigger that captured the change already carries the
/// full post-image row, so there is no separate insert/update branch to
/// get wrong.
pub struct Applier;

impl Applier {
    pub async fn apply(
        target: &dyn TargetTableStore,
        table: &TableInfo,
        change: &ChangeRecord,
    ) -> Result<()> {
        match change.operation {
            Operation::Insert | Operation::Update => {
                let data = change
                    .row_data
                    .as_ref()
                    .ok_or_else(|| EngineError::Apply(format!(
                        "change {} on {} has no row_data",
                        change.id, table.name
                    )))?;
                target.upsert_row(&table.name, &table.pk_col, data).await
            }
            Operation::Delete => target.delete_row(&table.name, &table.pk_col, &change.row_pk).await,
        }
    }
}
