use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::{EngineError, NodeId, Result};
use db::{DbSession, Value};
use serde_json::Value as Json;

use crate::types::{
    ChangeRecord, ConflictLogEntry, ConflictSummary, ConflictType, NewConflictLogEntry, Operation,
    ResolutionOutcome,
};

/// Default batch size for a single fetch-apply pass (§4.7).
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Table/column metadata a database exposes about its own schema (§4.2).
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// User tables eligible for sync, honoring the pair's table selection.
    async fn list_user_tables(&self) -> Result<Vec<String>>;

    /// The single-column primary key of `table`, if it has exactly one.
    /// Composite primary keys are unsupported (§9 Non-goals) and surface as
    /// `None` here, which the schema bootstrapper treats as "skip this table".
    async fn primary_key_of(&self, table: &str) -> Result<Option<String>>;

    /// Ordinary column names of `table`, in declaration order.
    async fn columns_of(&self, table: &str) -> Result<Vec<String>>;
}

/// The `change_log` table (§3.3): append-only capture of row mutations.
#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    async fn ensure_change_log(&self) -> Result<()>;

    /// Unapplied changes for `target_node`, oldest first, at most `limit`
    /// rows, optionally scoped to one table.
    async fn fetch_unapplied(
        &self,
        target_node: &NodeId,
        table: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>>;

    /// Idempotently mark `change_id` delivered to `target_node`. Returns
    /// `true` if this call added the node (`false` if it was already a
    /// member — see §3.3 "applied_nodes" idempotence).
    async fn mark_applied(&self, change_id: i64, target_node: &NodeId) -> Result<bool>;
}

/// A table on the target side of a replication pass (§4.6).
#[async_trait]
pub trait TargetTableStore: Send + Sync {
    async fn get_row(&self, table: &str, pk_col: &str, pk: &str) -> Result<Option<Json>>;

    /// Value of whichever timestamp column the table exposes
    /// (`updated_at`/`modified_at`/`last_modified`), if any (§4.5).
    async fn last_modified(
        &self,
        table: &str,
        pk_col: &str,
        pk: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn upsert_row(&self, table: &str, pk_col: &str, data: &Json) -> Result<()>;

    async fn delete_row(&self, table: &str, pk_col: &str, pk: &str) -> Result<()>;
}

/// The `conflict_log` audit table (§3.4, §4.10).
#[async_trait]
pub trait ConflictLogStore: Send + Sync {
    async fn ensure_conflict_log(&self) -> Result<()>;

    async fn log_conflict(&self, entry: NewConflictLogEntry) -> Result<()>;

    /// Grouped counts by `(conflict_type, resolution)`, most recent first.
    async fn summary(&self) -> Result<Vec<ConflictSummary>>;

    async fn recent(&self, limit: i64) -> Result<Vec<ConflictLogEntry>>;

    /// Entries whose resolution left the change unapplied (§4.10).
    async fn pending_manual(&self) -> Result<Vec<ConflictLogEntry>>;

    /// Delete entries older than `cutoff`; returns the number removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// A fully capable database endpoint — every port the driver, schema
/// bootstrapper, and conflict monitor need. Every sync-pair side (local and
/// cloud) is backed by one `SyncStore`, since in a bidirectional pair each
/// side plays source in one pass and target in the other.
pub trait SyncStore: SchemaIntrospector + ChangeLogStore + TargetTableStore + ConflictLogStore {}
impl<T> SyncStore for T where
    T: SchemaIntrospector + ChangeLogStore + TargetTableStore + ConflictLogStore
{
}

/// SQL-backed `SyncStore`, the production implementation. All SQL here
/// targets MySQL (`INFORMATION_SCHEMA`, `JSON_ARRAY_APPEND`/`JSON_SEARCH`,
/// `ON DUPLICATE KEY UPDATE`), matching the dialect `db::SqlxAnySession`
/// connects to.
pub struct SqlStore {
    session: Arc<dyn DbSession>,
}

impl SqlStore {
    pub fn new(session: Arc<dyn DbSession>) -> Self {
        Self { session }
    }

    fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
        match v {
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                }),
            Value::Int(i) => Utc.timestamp_opt(*i, 0).single(),
            _ => None,
        }
    }

    fn row_to_change(row: &db::Row) -> Result<ChangeRecord> {
        let id = match row.get("id") {
            Some(Value::Int(i)) => *i,
            _ => return Err(EngineError::Schema("change_log.id missing or non-numeric".into())),
        };
        let table_name = row
            .get("table_name")
            .and_then(Value::as_text)
            .ok_or_else(|| EngineError::Schema("change_log.table_name missing".into()))?
            .to_string();
        let operation = row
            .get("operation")
            .and_then(Value::as_text)
            .and_then(Operation::from_sql)
            .ok_or_else(|| EngineError::Schema("change_log.operation invalid".into()))?;
        let row_pk = row
            .get("row_pk")
            .and_then(Value::as_text)
            .ok_or_else(|| EngineError::Schema("change_log.row_pk missing".into()))?
            .to_string();
        let row_data = match row.get("row_data") {
            Some(Value::Json(j)) => Some(j.clone()),
            Some(Value::Text(s)) if !s.is_empty() => serde_json::from_str(s).ok(),
            _ => None,
        };
        let source_node = row
            .get("source_node")
            .and_then(Value::as_text)
            .map(|s| NodeId(s.to_string()))
            .ok_or_else(|| EngineError::Schema("change_log.source_node missing".into()))?;
        let created_at = row
            .get("created_at")
            .and_then(Self::parse_timestamp)
            .ok_or_else(|| EngineError::Schema("change_log.created_at unparsable".into()))?;
        let applied_nodes: HashSet<NodeId> = match row.get("applied_nodes") {
            Some(Value::Json(Json::Array(items))) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| NodeId(s.to_string())))
                .collect(),
            Some(Value::Text(s)) if !s.is_empty() => serde_json::from_str::<Vec<String>>(s)
                .map(|v| v.into_iter().map(NodeId).collect())
                .unwrap_or_default(),
            _ => HashSet::new(),
        };

        Ok(ChangeRecord {
            id,
            table_name,
            operation,
            row_pk,
            row_data,
            source_node,
            created_at,
            applied_nodes,
        })
    }

    fn row_to_conflict(row: &db::Row) -> Result<ConflictLogEntry> {
        let id = match row.get("id") {
            Some(Value::Int(i)) => *i,
            _ => return Err(EngineError::Schema("conflict_log.id missing".into())),
        };
        let change_id = match row.get("change_id") {
            Some(Value::Int(i)) => *i,
            _ => return Err(EngineError::Schema("conflict_log.change_id missing".into())),
        };
        let table_name = row
            .get("table_name")
            .and_then(Value::as_text)
            .unwrap_or_default()
            .to_string();
        let record_pk = row
            .get("record_pk")
            .and_then(Value::as_text)
            .unwrap_or_default()
            .to_string();
        let conflict_type = match row.get("conflict_type").and_then(Value::as_text) {
            Some("field_conflict") => ConflictType::FieldConflict,
            _ => ConflictType::TimestampConflict,
        };
        let source_data = match row.get("source_data") {
            Some(Value::Json(j)) => Some(j.clone()),
            Some(Value::Text(s)) if !s.is_empty() => serde_json::from_str(s).ok(),
            _ => None,
        };
        let target_data = match row.get("target_data") {
            Some(Value::Json(j)) => j.clone(),
            Some(Value::Text(s)) if !s.is_empty() => {
                serde_json::from_str(s).unwrap_or(Json::Null)
            }
            _ => Json::Null,
        };
        let conflict_details = match row.get("conflict_details") {
            Some(Value::Json(j)) => j.clone(),
            Some(Value::Text(s)) if !s.is_empty() => {
                serde_json::from_str(s).unwrap_or(Json::Null)
            }
            _ => Json::Null,
        };
        let resolution = parse_resolution(row.get("resolution").and_then(Value::as_text))
            .ok_or_else(|| EngineError::Schema("conflict_log.resolution invalid".into()))?;
        let resolved_at = row
            .get("resolved_at")
            .and_then(Self::parse_timestamp)
            .ok_or_else(|| EngineError::Schema("conflict_log.resolved_at unparsable".into()))?;

        Ok(ConflictLogEntry {
            id,
            change_id,
            table_name,
            record_pk,
            conflict_type,
            source_data,
            target_data,
            conflict_details,
            resolution,
            resolved_at,
        })
    }
}

fn parse_resolution(s: Option<&str>) -> Option<ResolutionOutcome> {
    match s? {
        "timestamp_wins_source" => Some(ResolutionOutcome::TimestampWinsSource),
        "timestamp_wins_target" => Some(ResolutionOutcome::TimestampWinsTarget),
        "source_wins" => Some(ResolutionOutcome::SourceWins),
        "target_wins" => Some(ResolutionOutcome::TargetWins),
        "merge_fields" => Some(ResolutionOutcome::MergeFields),
        "merge_no_safe_fields" => Some(ResolutionOutcome::MergeNoSafeFields),
        "manual" => Some(ResolutionOutcome::Manual),
        _ => None,
    }
}

#[async_trait]
impl SchemaIntrospector for SqlStore {
    async fn list_user_tables(&self) -> Result<Vec<String>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE' \
                 AND table_name NOT IN ('change_log', 'conflict_log')",
                &[Value::Text(self.session.db_name().to_string())],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("table_name").and_then(Value::as_text))
            .map(str::to_string)
            .collect())
    }

    async fn primary_key_of(&self, table: &str) -> Result<Option<String>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT column_name FROM information_schema.key_column_usage \
                 WHERE table_schema = ? AND table_name = ? AND constraint_name = 'PRIMARY'",
                &[
                    Value::Text(self.session.db_name().to_string()),
                    Value::Text(table.to_string()),
                ],
            )
            .await?;
        if rows.len() != 1 {
            return Ok(None);
        }
        Ok(rows[0]
            .get("column_name")
            .and_then(Value::as_text)
            .map(str::to_string))
    }

    async fn columns_of(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
                &[
                    Value::Text(self.session.db_name().to_string()),
                    Value::Text(table.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("column_name").and_then(Value::as_text))
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl ChangeLogStore for SqlStore {
    async fn ensure_change_log(&self) -> Result<()> {
        self.session
            .exec(
                "CREATE TABLE IF NOT EXISTS change_log (\
                    id BIGINT AUTO_INCREMENT PRIMARY KEY, \
                    table_name VARCHAR(255) NOT NULL, \
                    operation VARCHAR(10) NOT NULL, \
                    row_pk VARCHAR(255) NOT NULL, \
                    row_data JSON, \
                    source_node VARCHAR(64) NOT NULL, \
                    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                    applied_nodes JSON NOT NULL DEFAULT (JSON_ARRAY()), \
                    INDEX idx_change_log_table (table_name), \
                    INDEX idx_change_log_created (created_at)\
                )",
                &[],
            )
            .await
            .map_err(|e| EngineError::Schema(e.to_string()))?;

        // A legacy `change_log` table predating `applied_nodes` survives the
        // `CREATE TABLE IF NOT EXISTS` above untouched — migrate it in place.
        let has_applied_nodes = self
            .session
            .fetch_one_opt(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = 'change_log' AND column_name = 'applied_nodes'",
                &[Value::Text(self.session.db_name().to_string())],
            )
            .await
            .map_err(|e| EngineError::Schema(e.to_string()))?
            .is_some();

        if !has_applied_nodes {
            self.session
                .exec(
                    "ALTER TABLE change_log ADD COLUMN applied_nodes JSON NOT NULL DEFAULT (JSON_ARRAY())",
                    &[],
                )
                .await
                .map_err(|e| EngineError::Schema(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch_unapplied(
        &self,
        target_node: &NodeId,
        table: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChangeRecord>> {
        let node_needle = format!("\"{}\"", target_node.as_str());
        let (sql, params): (&str, Vec<Value>) = match table {
            Some(t) => (
                "SELECT * FROM change_log \
                 WHERE table_name = ? AND NOT JSON_CONTAINS(applied_nodes, ?) \
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                vec![
                    Value::Text(t.to_string()),
                    Value::Text(node_needle),
                    Value::Int(limit),
                ],
            ),
            None => (
                "SELECT * FROM change_log \
                 WHERE NOT JSON_CONTAINS(applied_nodes, ?) \
                 ORDER BY created_at ASC, id ASC LIMIT ?",
                vec![Value::Text(node_needle), Value::Int(limit)],
            ),
        };

        let rows = self.session.fetch_all(sql, &params).await?;
        rows.iter().map(Self::row_to_change).collect()
    }

    async fn mark_applied(&self, change_id: i64, target_node: &NodeId) -> Result<bool> {
        let affected = self
            .session
            .exec(
                "UPDATE change_log SET applied_nodes = JSON_ARRAY_APPEND(applied_nodes, '$', ?) \
                 WHERE id = ? AND NOT JSON_CONTAINS(applied_nodes, ?)",
                &[
                    Value::Text(target_node.as_str().to_string()),
                    Value::Int(change_id),
                    Value::Text(format!("\"{}\"", target_node.as_str())),
                ],
            )
            .await
            .map_err(|e| EngineError::MarkApplied(e.to_string()))?;
        Ok(affected > 0)
    }
}

#[async_trait]
impl TargetTableStore for SqlStore {
    async fn get_row(&self, table: &str, pk_col: &str, pk: &str) -> Result<Option<Json>> {
        let sql = format!("SELECT * FROM `{}` WHERE `{}` = ?", table, pk_col);
        let row = self
            .session
            .fetch_one_opt(&sql, &[Value::Text(pk.to_string())])
            .await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn last_modified(
        &self,
        table: &str,
        pk_col: &str,
        pk: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        for column in ["updated_at", "modified_at", "last_modified"] {
            let sql = format!(
                "SELECT `{}` AS ts FROM `{}` WHERE `{}` = ?",
                column, table, pk_col
            );
            if let Ok(Some(row)) = self
                .session
                .fetch_one_opt(&sql, &[Value::Text(pk.to_string())])
                .await
            {
                if let Some(v) = row.get("ts") {
                    if let Some(ts) = Self::parse_timestamp(v) {
                        return Ok(Some(ts));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn upsert_row(&self, table: &str, pk_col: &str, data: &Json) -> Result<()> {
        let obj = data
            .as_object()
            .ok_or_else(|| EngineError::Apply("row_data is not a JSON object".into()))?;
        let columns: Vec<&String> = obj.keys().collect();
        if columns.is_empty() {
            return Err(EngineError::Apply("row_data has no columns".into()));
        }

        let col_list = columns
            .iter()
            .map(|c| format!("`{}`", c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let update_list = columns
            .iter()
            .filter(|c| c.as_str() != pk_col)
            .map(|c| format!("`{}` = VALUES(`{}`)", c, c))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = if update_list.is_empty() {
            format!(
                "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE `{}` = `{}`",
                table, col_list, placeholders, pk_col, pk_col
            )
        } else {
            format!(
                "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                table, col_list, placeholders, update_list
            )
        };

        let params: Vec<Value> = columns.iter().map(|c| Value::from(obj[*c].clone())).collect();
        self.session
            .exec(&sql, &params)
            .await
            .map_err(|e| EngineError::Apply(e.to_string()))?;
        Ok(())
    }

    async fn delete_row(&self, table: &str, pk_col: &str, pk: &str) -> Result<()> {
        let sql = format!("DELETE FROM `{}` WHERE `{}` = ?", table, pk_col);
        self.session
            .exec(&sql, &[Value::Text(pk.to_string())])
            .await
            .map_err(|e| EngineError::Apply(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConflictLogStore for SqlStore {
    async fn ensure_conflict_log(&self) -> Result<()> {
        self.session
            .exec(
                "CREATE TABLE IF NOT EXISTS conflict_log (\
                    id BIGINT AUTO_INCREMENT PRIMARY KEY, \
                    change_id BIGINT NOT NULL, \
                    table_name VARCHAR(255) NOT NULL, \
                    record_pk VARCHAR(255) NOT NULL, \
                    conflict_type VARCHAR(32) NOT NULL, \
                    source_data JSON, \
                    target_data JSON NOT NULL, \
                    conflict_details JSON NOT NULL, \
                    resolution VARCHAR(32) NOT NULL, \
                    resolved_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                    INDEX idx_conflict_log_table (table_name), \
                    INDEX idx_conflict_log_resolution (resolution)\
                )",
                &[],
            )
            .await
            .map_err(|e| EngineError::Schema(e.to_string()))?;
        Ok(())
    }

    async fn log_conflict(&self, entry: NewConflictLogEntry) -> Result<()> {
        self.session
            .exec(
                "INSERT INTO conflict_log \
                 (change_id, table_name, record_pk, conflict_type, source_data, target_data, conflict_details, resolution) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    Value::Int(entry.change_id),
                    Value::Text(entry.table_name),
                    Value::Text(entry.record_pk),
                    Value::Text(conflict_type_str(entry.conflict_type).to_string()),
                    entry.source_data.map(Value::Json).unwrap_or(Value::Null),
                    Value::Json(entry.target_data),
                    Value::Json(entry.conflict_details),
                    Value::Text(entry.resolution.to_string()),
                ],
            )
            .await
            .map_err(|e| EngineError::Apply(e.to_string()))?;
        Ok(())
    }

    async fn summary(&self) -> Result<Vec<ConflictSummary>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT conflict_type, resolution, COUNT(*) AS count, MAX(resolved_at) AS latest \
                 FROM conflict_log GROUP BY conflict_type, resolution ORDER BY latest DESC",
                &[],
            )
            .await?;
        rows.iter()
            .map(|r| {
                let conflict_type = match r.get("conflict_type").and_then(Value::as_text) {
                    Some("field_conflict") => ConflictType::FieldConflict,
                    _ => ConflictType::TimestampConflict,
                };
                let resolution = parse_resolution(r.get("resolution").and_then(Value::as_text))
                    .ok_or_else(|| EngineError::Schema("invalid resolution in summary".into()))?;
                let count = match r.get("count") {
                    Some(Value::Int(i)) => *i,
                    _ => 0,
                };
                let latest_conflict = r
                    .get("latest")
                    .and_then(Self::parse_timestamp)
                    .unwrap_or_else(Utc::now);
                Ok(ConflictSummary {
                    conflict_type,
                    resolution,
                    count,
                    latest_conflict,
                })
            })
            .collect()
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ConflictLogEntry>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT * FROM conflict_log ORDER BY resolved_at DESC LIMIT ?",
                &[Value::Int(limit)],
            )
            .await?;
        rows.iter().map(Self::row_to_conflict).collect()
    }

    async fn pending_manual(&self) -> Result<Vec<ConflictLogEntry>> {
        let rows = self
            .session
            .fetch_all(
                "SELECT * FROM conflict_log \
                 WHERE resolution IN ('timestamp_wins_target', 'target_wins', 'merge_no_safe_fields', 'manual') \
                 ORDER BY resolved_at DESC",
                &[],
            )
            .await?;
        rows.iter().map(Self::row_to_conflict).collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.session
            .exec(
                "DELETE FROM conflict_log WHERE resolved_at < ?",
                &[Value::Text(cutoff.to_rfc3339())],
            )
            .await
            .map_err(|e| EngineError::Apply(e.to_string()))
    }
}

fn conflict_type_str(t: ConflictType) -> &'static str {
    match t {
        ConflictType::TimestampConflict => "timestamp_conflict",
        ConflictType::FieldConflict => "field_conflict",
    }
}

fn row_to_json(row: &db::Row) -> Json {
    let mut map = serde_json::Map::new();
    for (name, value) in &row.0 {
        let json_value = match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            Value::Json(j) => j.clone(),
        };
        map.insert(name.clone(), json_value);
    }
    Json::Object(map)
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `SyncStore` fake for unit-testing the driver and
    //! conflict handler without a live database. It implements the
    //! higher-level store traits directly rather than parsing SQL.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeStore {
        pub change_log: Mutex<Vec<ChangeRecord>>,
        pub next_change_id: Mutex<i64>,
        pub tables: Mutex<HashMap<String, HashMap<String, Json>>>,
        pub last_modified: Mutex<HashMap<(String, String), DateTime<Utc>>>,
        pub conflict_log: Mutex<Vec<ConflictLogEntry>>,
        pub next_conflict_id: Mutex<i64>,
        pub pk_columns: Mutex<HashMap<String, String>>,
    }

    impl FakeStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_table_pk(self, table: &str, pk_col: &str) -> Self {
            self.pk_columns
                .lock()
                .insert(table.to_string(), pk_col.to_string());
            self
        }

        pub fn push_change(&self, mut change: ChangeRecord) -> i64 {
            let mut next = self.next_change_id.lock();
            *next += 1;
            change.id = *next;
            let id = change.id;
            self.change_log.lock().push(change);
            id
        }

        pub fn seed_row(&self, table: &str, pk_col: &str, pk: &str, data: Json, modified: Option<DateTime<Utc>>) {
            self.tables
                .lock()
                .entry(table.to_string())
                .or_default()
                .insert(pk.to_string(), data);
            if let Some(m) = modified {
                self.last_modified
                    .lock()
                    .insert((table.to_string(), pk.to_string()), m);
            }
            self.pk_columns
                .lock()
                .entry(table.to_string())
                .or_insert_with(|| pk_col.to_string());
        }
    }

    #[async_trait]
    impl SchemaIntrospector for FakeStore {
        async fn list_user_tables(&self) -> Result<Vec<String>> {
            Ok(self.tables.lock().keys().cloned().collect())
        }

        async fn primary_key_of(&self, table: &str) -> Result<Option<String>> {
            Ok(self.pk_columns.lock().get(table).cloned())
        }

        async fn columns_of(&self, table: &str) -> Result<Vec<String>> {
            Ok(self
                .tables
                .lock()
                .get(table)
                .and_then(|rows| rows.values().next())
                .and_then(|v| v.as_object())
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl ChangeLogStore for FakeStore {
        async fn ensure_change_log(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch_unapplied(
            &self,
            target_node: &NodeId,
            table: Option<&str>,
            limit: i64,
        ) -> Result<Vec<ChangeRecord>> {
            let log = self.change_log.lock();
            Ok(log
                .iter()
                .filter(|c| table.map_or(true, |t| c.table_name == t))
                .filter(|c| !c.applied_nodes.contains(target_node))
                .take(limit.max(0) as usize)
                .cloned()
                .collect())
        }

        async fn mark_applied(&self, change_id: i64, target_node: &NodeId) -> Result<bool> {
            let mut log = self.change_log.lock();
            if let Some(change) = log.iter_mut().find(|c| c.id == change_id) {
                return Ok(change.applied_nodes.insert(target_node.clone()));
            }
            Ok(false)
        }
    }

    #[async_trait]
    impl TargetTableStore for FakeStore {
        async fn get_row(&self, table: &str, _pk_col: &str, pk: &str) -> Result<Option<Json>> {
            Ok(self
                .tables
                .lock()
                .get(table)
                .and_then(|rows| rows.get(pk))
                .cloned())
        }

        async fn last_modified(
            &self,
            table: &str,
            _pk_col: &str,
            pk: &str,
        ) -> Result<Option<DateTime<Utc>>> {
            Ok(self
                .last_modified
                .lock()
                .get(&(table.to_string(), pk.to_string()))
                .copied())
        }

        async fn upsert_row(&self, table: &str, pk_col: &str, data: &Json) -> Result<()> {
            let pk = data
                .get(pk_col)
                .and_then(|v| v.as_str().map(str::to_string).or_else(|| Some(v.to_string())))
                .ok_or_else(|| EngineError::Apply("row_data missing primary key".into()))?;
            self.tables
                .lock()
                .entry(table.to_string())
                .or_default()
                .insert(pk, data.clone());
            Ok(())
        }

        async fn delete_row(&self, table: &str, _pk_col: &str, pk: &str) -> Result<()> {
            if let Some(rows) = self.tables.lock().get_mut(table) {
                rows.remove(pk);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ConflictLogStore for FakeStore {
        async fn ensure_conflict_log(&self) -> Result<()> {
            Ok(())
        }

        async fn log_conflict(&self, entry: NewConflictLogEntry) -> Result<()> {
            let mut next = self.next_conflict_id.lock();
            *next += 1;
            self.conflict_log.lock().push(ConflictLogEntry {
                id: *next,
                change_id: entry.change_id,
                table_name: entry.table_name,
                record_pk: entry.record_pk,
                conflict_type: entry.conflict_type,
                source_data: entry.source_data,
                target_data: entry.target_data,
                conflict_details: entry.conflict_details,
                resolution: entry.resolution,
                resolved_at: Utc::now(),
            });
            Ok(())
        }

        async fn summary(&self) -> Result<Vec<ConflictSummary>> {
            let mut grouped: HashMap<(ConflictType, ResolutionOutcome), ConflictSummary> =
                HashMap::new();
            for entry in self.conflict_log.lock().iter() {
                let key = (entry.conflict_type, entry.resolution);
                let summary = grouped.entry(key).or_insert(ConflictSummary {
                    conflict_type: entry.conflict_type,
                    resolution: entry.resolution,
                    count: 0,
                    latest_conflict: entry.resolved_at,
                });
                summary.count += 1;
                if entry.resolved_at > summary.latest_conflict {
                    summary.latest_conflict = entry.resolved_at;
                }
            }
            Ok(grouped.into_values().collect())
        }

        async fn recent(&self, limit: i64) -> Result<Vec<ConflictLogEntry>> {
            let log = self.conflict_log.lock();
            Ok(log.iter().rev().take(limit.max(0) as usize).cloned().collect())
        }

        async fn pending_manual(&self) -> Result<Vec<ConflictLogEntry>> {
            Ok(self
                .conflict_log
                .lock()
                .iter()
                .filter(|e| e.resolution.left_unapplied())
                .cloned()
                .collect())
        }

        async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut log = self.conflict_log.lock();
            let before = log.len();
            log.retain(|e| e.resolved_at >= cutoff);
            Ok((before - log.len()) as u64)
        }
    }
}
