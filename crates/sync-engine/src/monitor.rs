use chrono::{DateTime, Utc};
use common::Result;

use crate::store::ConflictLogStore;
use crate::types::{ConflictLogEntry, ConflictSummary};

/// Read-only view over a database's `conflict_log`, for the operator
/// surface (§4.10). Every method is a thin pass-through — the value this
/// type adds is giving the conflict-monitoring operations a stable,
/// documented home distinct from the replication driver.
pub struct ConflictMonitor<'a> {
    store: &'a dyn ConflictLogStore,
}

impl<'a> ConflictMonitor<'a> {
    pub fn new(store: &'a dyn ConflictLogStore) -> Self {
        Self { store }
    }

    /// Grouped counts by `(conflict_type, resolution)`.
    pub async fn summary(&self) -> Result<Vec<ConflictSummary>> {
        self.store.summary().await
    }

    /// The most recently resolved conflicts, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<ConflictLogEntry>> {
        self.store.recent(limit).await
    }

    /// Conflicts whose resolution left the source change unapplied and so
    /// still need an operator's attention.
    pub async fn pending_manual(&self) -> Result<Vec<ConflictLogEntry>> {
        self.store.pending_manual().await
    }

    /// Deletes audit entries older than `cutoff`. The replication engine
    /// does not call this on its own — §9 notes there is no built-in
    /// retention policy, so an operator (or an external cron job) decides
    /// when and how aggressively to purge.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.store.purge_older_than(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::FakeStore;
    use crate::types::{ConflictType, NewConflictLogEntry, ResolutionOutcome};

    #[tokio::test]
    async fn pending_manual_filters_by_resolution() {
        let store = FakeStore::new();
        store
            .log_conflict(NewConflictLogEntry {
                change_id: 1,
                table_name: "orders".into(),
                record_pk: "1".into(),
                conflict_type: ConflictType::FieldConflict,
                source_data: None,
                target_data: serde_json::json!({}),
                conflict_details: serde_json::json!({}),
                resolution: ResolutionOutcome::Manual,
            })
            .await
            .unwrap();
        store
            .log_conflict(NewConflictLogEntry {
                change_id: 2,
                table_name: "orders".into(),
                record_pk: "2".into(),
                conflict_type: ConflictType::TimestampConflict,
                source_data: None,
                target_data: serde_json::json!({}),
                conflict_details: serde_json::json!({}),
                resolution: ResolutionOutcome::SourceWins,
            })
            .await
            .unwrap();

        let monitor = ConflictMonitor::new(&store);
        let pending = monitor.pending_manual().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].change_id, 1);
    }

    #[tokio::test]
    async fn purge_older_than_removes_stale_entries() {
        let store = FakeStore::new();
        store
            .log_conflict(NewConflictLogEntry {
                change_id: 1,
                table_name: "orders".into(),
                record_pk: "1".into(),
                conflict_type: ConflictType::FieldConflict,
                source_data: None,
                target_data: serde_json::json!({}),
                conflict_details: serde_json::json!({}),
                resolution: ResolutionOutcome::Manual,
            })
            .await
            .unwrap();

        let monitor = ConflictMonitor::new(&store);
        let removed = monitor.purge_older_than(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(monitor.recent(10).await.unwrap().is_empty());
    }
}
