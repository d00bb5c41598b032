use common::{NodeId, Result};

use crate::store::ChangeLogStore;
use crate::types::ChangeRecord;

/// Pulls one batch of undelivered changes for `target_node` (§4.4). A thin
/// wrapper over `ChangeLogStore::fetch_unapplied` — kept as its own
/// component so the driver reads as a pipeline of named stages.
pub struct ChangeFetcher;

impl ChangeFetcher {
    pub async fn fetch_batch(
        store: &dyn ChangeLogStore,
        target_node: &NodeId,
        table: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>> {
        store.fetch_unapplied(target_node, table, limit).await
    }
}
