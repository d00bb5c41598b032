use chrono::{DateTime, Utc};
use common::{ConflictStrategy, Result};
use serde_json::Value as Json;

use crate::schema::TableInfo;
use crate::store::{ConflictLogStore, TargetTableStore};
use crate::types::{
    ChangeRecord, ConflictDetails, FieldConflictEntry, NewConflictLogEntry, Operation,
    ResolutionOutcome,
};

fn stringify(value: &Json) -> String {
    match value {
        Json::Null => String::new(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pure conflict detection (§4.5): compares the incoming change against
/// whatever the target row currently holds.
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn detect(
        change: &ChangeRecord,
        target_row: Option<&Json>,
        target_modified: Option<DateTime<Utc>>,
    ) -> Option<ConflictDetails> {
        // Deletes and fresh inserts (no existing target row) never conflict.
        if change.operation == Operation::Delete {
            return None;
        }
        let target_row = target_row?;
        let source_data = change.row_data.as_ref()?;

        // When the target exposes a last-modified column, compare it
        // against the change's own `created_at` — not anything pulled out
        // of the source payload. The target is only in conflict when it
        // was modified more recently than the change being replicated in.
        if let Some(target_modified) = target_modified {
            return if target_modified > change.created_at {
                Some(ConflictDetails::Timestamp {
                    source_time: change.created_at,
                    target_time: target_modified,
                    target_row: target_row.clone(),
                })
            } else {
                None
            };
        }

        let (Some(source_obj), Some(target_obj)) = (source_data.as_object(), target_row.as_object())
        else {
            return None;
        };

        let conflicts: Vec<FieldConflictEntry> = source_obj
            .iter()
            .filter_map(|(field, source_value)| {
                let target_value = target_obj.get(field)?;
                if stringify(source_value) != stringify(target_value) {
                    Some(FieldConflictEntry {
                        field: field.clone(),
                        source_value: source_value.clone(),
                        target_value: target_value.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();

        if conflicts.is_empty() {
            None
        } else {
            Some(ConflictDetails::Field {
                conflicts,
                target_row: target_row.clone(),
            })
        }
    }
}

/// What the driver should do with a change once the resolver has weighed
/// in. `ApplyMerged` carries a row built from the target's safe subset of
/// non-conflicting source fields (§4.6 `merge_fields`), to be upserted in
/// place of the change's full `row_data`.
#[derive(Debug, Clone)]
pub enum ResolutionAction {
    Apply,
    ApplyMerged(Json),
    Skip,
}

/// Computes the safe-field merge for a `merge_fields` strategy against a
/// field-level conflict: the target's row with every source field that
/// isn't the primary key or one of the conflicting fields overlaid on top.
/// Returns `None` when no such safe field exists.
fn merge_safe_fields(
    source_data: &Json,
    pk_col: &str,
    conflicts: &[FieldConflictEntry],
    target_row: &Json,
) -> Option<Json> {
    let source_obj = source_data.as_object()?;
    let target_obj = target_row.as_object()?;
    let conflicting: std::collections::HashSet<&str> =
        conflicts.iter().map(|c| c.field.as_str()).collect();

    let safe_fields: Vec<&String> = source_obj
        .keys()
        .filter(|f| f.as_str() != pk_col && !conflicting.contains(f.as_str()))
        .collect();
    if safe_fields.is_empty() {
        return None;
    }

    let mut merged = target_obj.clone();
    for field in safe_fields {
        merged.insert(field.clone(), source_obj[field].clone());
    }
    Some(Json::Object(merged))
}

/// Pure conflict resolution (§4.6). Returns what the driver should do with
/// the source change, and the outcome to record in `conflict_log`.
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve(
        strategy: ConflictStrategy,
        source_data: &Json,
        pk_col: &str,
        details: &ConflictDetails,
    ) -> (ResolutionAction, ResolutionOutcome) {
        match (strategy, details) {
            (ConflictStrategy::TimestampWins, ConflictDetails::Timestamp {
                source_time,
                target_time,
                ..
            }) => {
                if source_time >= target_time {
                    (ResolutionAction::Apply, ResolutionOutcome::TimestampWinsSource)
                } else {
                    (ResolutionAction::Skip, ResolutionOutcome::TimestampWinsTarget)
                }
            }
            // No usable timestamp column to compare by — source wins.
            (ConflictStrategy::TimestampWins, ConflictDetails::Field { .. }) => {
                (ResolutionAction::Apply, ResolutionOutcome::TimestampWinsSource)
            }
            (ConflictStrategy::SourceWins, _) => (ResolutionAction::Apply, ResolutionOutcome::SourceWins),
            (ConflictStrategy::TargetWins, _) => (ResolutionAction::Skip, ResolutionOutcome::TargetWins),
            (ConflictStrategy::MergeFields, ConflictDetails::Timestamp {
                source_time,
                target_time,
                ..
            }) => {
                if source_time >= target_time {
                    (ResolutionAction::Apply, ResolutionOutcome::MergeFields)
                } else {
                    (ResolutionAction::Skip, ResolutionOutcome::MergeNoSafeFields)
                }
            }
            (ConflictStrategy::MergeFields, ConflictDetails::Field { conflicts, target_row }) => {
                match merge_safe_fields(source_data, pk_col, conflicts, target_row) {
                    Some(merged) => (ResolutionAction::ApplyMerged(merged), ResolutionOutcome::MergeFields),
                    None => (ResolutionAction::Skip, ResolutionOutcome::MergeNoSafeFields),
                }
            }
            (ConflictStrategy::Manual, _) => (ResolutionAction::Skip, ResolutionOutcome::Manual),
        }
    }
}

/// Ties detection and resolution to the store: looks up the target row,
/// logs a conflict if one is found, and tells the driver what to do next.
pub struct ConflictHandler;

impl ConflictHandler {
    pub async fn check<S>(
        target: &S,
        strategy: ConflictStrategy,
        change: &ChangeRecord,
        table: &TableInfo,
    ) -> Result<ResolutionAction>
    where
        S: TargetTableStore + ConflictLogStore + ?Sized,
    {
        let target_row = target
            .get_row(&table.name, &table.pk_col, &change.row_pk)
            .await?;
        let target_modified = target
            .last_modified(&table.name, &table.pk_col, &change.row_pk)
            .await?;

        let Some(details) = ConflictDetector::detect(change, target_row.as_ref(), target_modified)
        else {
            return Ok(ResolutionAction::Apply);
        };

        let source_data = change.row_data.clone().unwrap_or(Json::Null);
        let (action, resolution) =
            ConflictResolver::resolve(strategy, &source_data, &table.pk_col, &details);

        target
            .log_conflict(NewConflictLogEntry {
                change_id: change.id,
                table_name: table.name.clone(),
                record_pk: change.row_pk.clone(),
                conflict_type: details.conflict_type(),
                source_data: change.row_data.clone(),
                target_data: details.target_row().clone(),
                conflict_details: details.to_json(),
                resolution,
            })
            .await?;

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::NodeId;
    use std::collections::HashSet;

    fn change(row_data: Json) -> ChangeRecord {
        ChangeRecord {
            id: 1,
            table_name: "orders".into(),
            operation: Operation::Update,
            row_pk: "42".into(),
            row_data: Some(row_data),
            source_node: NodeId("src".into()),
            created_at: Utc::now(),
            applied_nodes: HashSet::new(),
        }
    }

    #[test]
    fn no_target_row_means_no_conflict() {
        let c = change(serde_json::json!({"id": 42, "status": "shipped"}));
        assert!(ConflictDetector::detect(&c, None, None).is_none());
    }

    #[test]
    fn target_newer_than_source_change_is_a_timestamp_conflict() {
        let c = change(serde_json::json!({"id": 42, "status": "shipped"}));
        let target_time = c.created_at + chrono::Duration::minutes(5);
        let target_row = serde_json::json!({"id": 42, "status": "pending"});
        let details = ConflictDetector::detect(&c, Some(&target_row), Some(target_time));
        match details {
            Some(ConflictDetails::Timestamp { source_time, target_time: t, .. }) => {
                assert_eq!(source_time, c.created_at);
                assert_eq!(t, target_time);
            }
            other => panic!("expected timestamp conflict, got {:?}", other),
        }
    }

    #[test]
    fn target_not_newer_than_source_change_means_no_conflict() {
        let c = change(serde_json::json!({"id": 42, "status": "shipped"}));
        let target_row = serde_json::json!({"id": 42, "status": "pending"});
        // Equal timestamps: target is not strictly newer, no conflict.
        assert!(ConflictDetector::detect(&c, Some(&target_row), Some(c.created_at)).is_none());

        let older = c.created_at - chrono::Duration::minutes(5);
        assert!(ConflictDetector::detect(&c, Some(&target_row), Some(older)).is_none());
    }

    #[test]
    fn field_level_conflict_without_timestamp_column() {
        let c = change(serde_json::json!({"id": 42, "status": "shipped"}));
        let target_row = serde_json::json!({"id": 42, "status": "pending"});
        let details = ConflictDetector::detect(&c, Some(&target_row), None);
        match details {
            Some(ConflictDetails::Field { conflicts, .. }) => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].field, "status");
            }
            other => panic!("expected field conflict, got {:?}", other.is_some()),
        }
    }

    #[test]
    fn timestamp_wins_picks_newer_side() {
        let details = ConflictDetails::Timestamp {
            source_time: Utc::now(),
            target_time: Utc::now() - chrono::Duration::minutes(1),
            target_row: Json::Null,
        };
        let (action, outcome) =
            ConflictResolver::resolve(ConflictStrategy::TimestampWins, &Json::Null, "id", &details);
        assert!(matches!(action, ResolutionAction::Apply));
        assert_eq!(outcome, ResolutionOutcome::TimestampWinsSource);
    }

    #[test]
    fn timestamp_wins_applies_field_conflicts_with_no_timestamp_info() {
        let details = ConflictDetails::Field {
            conflicts: vec![FieldConflictEntry {
                field: "status".into(),
                source_value: Json::String("shipped".into()),
                target_value: Json::String("pending".into()),
            }],
            target_row: Json::Null,
        };
        let (action, outcome) =
            ConflictResolver::resolve(ConflictStrategy::TimestampWins, &Json::Null, "id", &details);
        assert!(matches!(action, ResolutionAction::Apply));
        assert_eq!(outcome, ResolutionOutcome::TimestampWinsSource);
    }

    #[test]
    fn merge_fields_has_no_safe_subset_when_every_field_conflicts() {
        let source_data = serde_json::json!({"id": 42, "status": "shipped"});
        let target_row = serde_json::json!({"id": 42, "status": "pending"});
        let details = ConflictDetails::Field {
            conflicts: vec![FieldConflictEntry {
                field: "status".into(),
                source_value: Json::String("shipped".into()),
                target_value: Json::String("pending".into()),
            }],
            target_row: target_row.clone(),
        };
        let (action, outcome) =
            ConflictResolver::resolve(ConflictStrategy::MergeFields, &source_data, "id", &details);
        assert!(matches!(action, ResolutionAction::Skip));
        assert_eq!(outcome, ResolutionOutcome::MergeNoSafeFields);
    }

    #[test]
    fn merge_fields_applies_the_safe_subset_when_one_exists() {
        let source_data =
            serde_json::json!({"id": 42, "status": "shipped", "notes": "left at door"});
        let target_row = serde_json::json!({"id": 42, "status": "pending", "notes": "old note"});
        let details = ConflictDetails::Field {
            conflicts: vec![FieldConflictEntry {
                field: "status".into(),
                source_value: Json::String("shipped".into()),
                target_value: Json::String("pending".into()),
            }],
            target_row: target_row.clone(),
        };
        let (action, outcome) =
            ConflictResolver::resolve(ConflictStrategy::MergeFields, &source_data, "id", &details);
        assert_eq!(outcome, ResolutionOutcome::MergeFields);
        match action {
            ResolutionAction::ApplyMerged(merged) => {
                // The conflicting field keeps the target's value...
                assert_eq!(merged["status"], Json::String("pending".into()));
                // ...but the safe field is overlaid from source.
                assert_eq!(merged["notes"], Json::String("left at door".into()));
                assert_eq!(merged["id"], Json::from(42));
            }
            other => panic!("expected a merged row, got {:?}", other),
        }
    }

    #[test]
    fn manual_strategy_never_applies() {
        let details = ConflictDetails::Field {
            conflicts: vec![],
            target_row: Json::Null,
        };
        let (action, outcome) =
            ConflictResolver::resolve(ConflictStrategy::Manual, &Json::Null, "id", &details);
        assert!(matches!(action, ResolutionAction::Skip));
        assert_eq!(outcome, ResolutionOutcome::Manual);
    }
}
