use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use common::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The DML verb that produced a `ChangeRecord` (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Operation::Insert),
            "UPDATE" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// One captured row-level mutation (§3.3). `applied_nodes` membership is
/// the sole record of delivery — insertion order is irrelevant.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub id: i64,
    pub table_name: String,
    pub operation: Operation,
    pub row_pk: String,
    pub row_data: Option<Json>,
    pub source_node: NodeId,
    pub created_at: DateTime<Utc>,
    pub applied_nodes: HashSet<NodeId>,
}

impl ChangeRecord {
    pub fn is_applied_to(&self, node: &NodeId) -> bool {
        self.applied_nodes.contains(node)
    }
}

/// The kind of inconsistency the conflict detector found (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TimestampConflict,
    FieldConflict,
}

/// One field-level mismatch between the source payload and the target row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConflictEntry {
    pub field: String,
    pub source_value: Json,
    pub target_value: Json,
}

/// Full detail of a detected conflict, carrying whatever the resolver and
/// the audit log need.
#[derive(Debug, Clone)]
pub enum ConflictDetails {
    Timestamp {
        source_time: DateTime<Utc>,
        target_time: DateTime<Utc>,
        target_row: Json,
    },
    Field {
        conflicts: Vec<FieldConflictEntry>,
        target_row: Json,
    },
}

impl ConflictDetails {
    pub fn conflict_type(&self) -> ConflictType {
        match self {
            ConflictDetails::Timestamp { .. } => ConflictType::TimestampConflict,
            ConflictDetails::Field { .. } => ConflictType::FieldConflict,
        }
    }

    pub fn target_row(&self) -> &Json {
        match self {
            ConflictDetails::Timestamp { target_row, .. } => target_row,
            ConflictDetails::Field { target_row, .. } => target_row,
        }
    }

    /// JSON rendering of the details, for the `conflict_details` audit column.
    pub fn to_json(&self) -> Json {
        match self {
            ConflictDetails::Timestamp {
                source_time,
                target_time,
                ..
            } => serde_json::json!({
                "type": "timestamp_conflict",
                "source_time": source_time,
                "target_time": target_time,
            }),
            ConflictDetails::Field { conflicts, .. } => serde_json::json!({
                "type": "field_conflict",
                "conflicts": conflicts,
            }),
        }
    }
}

/// The resolver's decision, recorded verbatim into `conflict_log.resolution`
/// (§4.6). The exact strings mirror the original agent's audit trail so an
/// operator reading `conflict_log` sees familiar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    TimestampWinsSource,
    TimestampWinsTarget,
    SourceWins,
    TargetWins,
    MergeFields,
    MergeNoSafeFields,
    Manual,
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionOutcome::TimestampWinsSource => "timestamp_wins_source",
            ResolutionOutcome::TimestampWinsTarget => "timestamp_wins_target",
            ResolutionOutcome::SourceWins => "source_wins",
            ResolutionOutcome::TargetWins => "target_wins",
            ResolutionOutcome::MergeFields => "merge_fields",
            ResolutionOutcome::MergeNoSafeFields => "merge_no_safe_fields",
            ResolutionOutcome::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

impl ResolutionOutcome {
    /// Resolutions that left the source change unapplied — the "manual
    /// resolution queue" the conflict monitor (§4.10) surfaces.
    pub fn left_unapplied(&self) -> bool {
        matches!(
            self,
            ResolutionOutcome::TimestampWinsTarget
                | ResolutionOutcome::TargetWins
                | ResolutionOutcome::MergeNoSafeFields
                | ResolutionOutcome::Manual
        )
    }
}

/// Append-only audit record written by the resolver (§3.4).
#[derive(Debug, Clone)]
pub struct ConflictLogEntry {
    pub id: i64,
    pub change_id: i64,
    pub table_name: String,
    pub record_pk: String,
    pub conflict_type: ConflictType,
    pub source_data: Option<Json>,
    pub target_data: Json,
    pub conflict_details: Json,
    pub resolution: ResolutionOutcome,
    pub resolved_at: DateTime<Utc>,
}

/// A not-yet-assigned `ConflictLogEntry`, passed to the store for insertion.
#[derive(Debug, Clone)]
pub struct NewConflictLogEntry {
    pub change_id: i64,
    pub table_name: String,
    pub record_pk: String,
    pub conflict_type: ConflictType,
    pub source_data: Option<Json>,
    pub target_data: Json,
    pub conflict_details: Json,
    pub resolution: ResolutionOutcome,
}

/// One grouped row of the conflict monitor's summary view (§4.10).
#[derive(Debug, Clone)]
pub struct ConflictSummary {
    pub conflict_type: ConflictType,
    pub resolution: ResolutionOutcome,
    pub count: i64,
    pub latest_conflict: DateTime<Utc>,
}
