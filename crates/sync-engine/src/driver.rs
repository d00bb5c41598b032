use common::{NodeId, Side, SyncPairConfig, TableDirection};
use tracing::{debug, info, warn};

use crate::apply::Applier;
use crate::conflict::{ConflictHandler, ResolutionAction};
use crate::fetch::ChangeFetcher;
use crate::schema::TableInfo;
use crate::store::{SyncStore, TargetTableStore, DEFAULT_BATCH_SIZE};

/// Outcome of one `run_direction` call, surfaced for logging and the
/// scheduler's tick summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectionStats {
    pub tables_synced: u32,
    pub changes_applied: u32,
    pub changes_conflicted: u32,
    pub changes_skipped_self: u32,
}

fn table_enabled(direction: TableDirection, source_side: Side) -> bool {
    match direction {
        TableDirection::Bidirectional => true,
        TableDirection::LocalToCloud => source_side == Side::Local,
        TableDirection::CloudToLocal => source_side == Side::Cloud,
        TableDirection::NoSync => false,
    }
}

/// Runs the fetch-detect-resolve-apply-mark loop (§4.7) for one direction of
/// a sync pair: `source` supplies undelivered changes, `target` receives
/// them. Call this twice per tick for a bidirectional pair — once with each
/// side as source — letting per-table direction overrides decide, per call,
/// which tables are actually in scope.
pub struct ReplicationDriver;

impl ReplicationDriver {
    pub async fn run_direction(
        source: &dyn SyncStore,
        target: &dyn SyncStore,
        source_node: &NodeId,
        target_node: &NodeId,
        source_side: Side,
        pair: &SyncPairConfig,
        tables: &[TableInfo],
    ) -> common::Result<DirectionStats> {
        let mut stats = DirectionStats::default();

        for table in tables {
            let direction = pair.direction_for(&table.name);
            if !table_enabled(direction, source_side) {
                continue;
            }
            stats.tables_synced += 1;

            let changes = ChangeFetcher::fetch_batch(
                source,
                target_node,
                Some(&table.name),
                DEFAULT_BATCH_SIZE,
            )
            .await?;

            for change in &changes {
                // A change already attributed to the node we're delivering
                // to must have originated there — applying it back would
                // create a replication loop.
                if &change.source_node == target_node {
                    stats.changes_skipped_self += 1;
                    continue;
                }

                let decision =
                    ConflictHandler::check(target, pair.conflict_resolution, change, table).await?;

                let applied = match decision {
                    ResolutionAction::Apply => {
                        if let Err(e) = Applier::apply(target, table, change).await {
                            warn!(change_id = change.id, table = %table.name, error = %e, "apply failed");
                            continue;
                        }
                        debug!(change_id = change.id, table = %table.name, "applied");
                        true
                    }
                    ResolutionAction::ApplyMerged(merged) => {
                        if let Err(e) = target.upsert_row(&table.name, &table.pk_col, &merged).await {
                            warn!(change_id = change.id, table = %table.name, error = %e, "merge apply failed");
                            continue;
                        }
                        debug!(change_id = change.id, table = %table.name, "merged");
                        true
                    }
                    ResolutionAction::Skip => {
                        stats.changes_conflicted += 1;
                        false
                    }
                };

                source.mark_applied(change.id, target_node).await?;
                stats.changes_applied += applied as u32;
            }
        }

        info!(
            pair = %pair.name,
            source_side = source_side.as_str(),
            tables = stats.tables_synced,
            applied = stats.changes_applied,
            conflicted = stats.changes_conflicted,
            "direction pass complete"
        );

        Ok(stats)
    }
}
