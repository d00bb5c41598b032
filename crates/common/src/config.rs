use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

fn default_port() -> u16 {
    3306
}

fn default_sync_interval_minutes() -> u32 {
    10
}

fn default_direction() -> TableDirection {
    TableDirection::Bidirectional
}

/// One endpoint of a sync pair (the `local` or `cloud` side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
}

/// Which tables a pair should synchronize: every user table, or an
/// explicit set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSelection {
    All(AllTablesTag),
    Explicit(Vec<String>),
}

/// Sentinel wrapper so the `"all"` string round-trips cleanly through serde
/// alongside the `Vec<String>` variant above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllTablesTag {
    All,
}

impl TableSelection {
    pub fn is_all(&self) -> bool {
        matches!(self, TableSelection::All(AllTablesTag::All))
    }

    /// The explicit table list, if this selection names one rather than
    /// selecting every user table.
    pub fn explicit_tables(&self) -> Option<Vec<String>> {
        match self {
            TableSelection::All(_) => None,
            TableSelection::Explicit(tables) => Some(tables.clone()),
        }
    }
}

/// Per-table sync direction override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableDirection {
    Bidirectional,
    LocalToCloud,
    CloudToLocal,
    NoSync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOverride {
    #[serde(default = "default_direction")]
    pub direction: TableDirection,
}

/// Conflict resolution strategy tag, selected once per sync pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    TimestampWins,
    SourceWins,
    TargetWins,
    MergeFields,
    Manual,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::TimestampWins
    }
}

impl ConflictStrategy {
    /// Human-readable description, for operator tooling that lists the
    /// available strategies before a pair is configured.
    pub fn describe(&self) -> &'static str {
        match self {
            ConflictStrategy::TimestampWins => {
                "Most recent change wins (requires updated_at column)"
            }
            ConflictStrategy::SourceWins => "Source database always wins",
            ConflictStrategy::TargetWins => "Target database always wins",
            ConflictStrategy::MergeFields => "Merge non-conflicting fields only",
            ConflictStrategy::Manual => "Log conflicts for manual resolution (safest)",
        }
    }

    pub fn all() -> &'static [ConflictStrategy] {
        &[
            ConflictStrategy::TimestampWins,
            ConflictStrategy::SourceWins,
            ConflictStrategy::TargetWins,
            ConflictStrategy::MergeFields,
            ConflictStrategy::Manual,
        ]
    }
}

fn default_conflict_resolution() -> ConflictStrategy {
    ConflictStrategy::TimestampWins
}

fn default_tables() -> TableSelection {
    TableSelection::All(AllTablesTag::All)
}

/// A named binding of a local and a cloud database with table-level sync
/// configuration. Immutable for the duration of one scheduler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPairConfig {
    pub name: String,
    pub local: EndpointConfig,
    pub cloud: EndpointConfig,
    #[serde(default = "default_tables")]
    pub tables: TableSelection,
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictStrategy,
    #[serde(default)]
    pub table_overrides: HashMap<String, TableOverride>,
}

impl SyncPairConfig {
    pub fn direction_for(&self, table: &str) -> TableDirection {
        self.table_overrides
            .get(table)
            .map(|o| o.direction)
            .unwrap_or(TableDirection::Bidirectional)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u32,
    pub sync_pairs: Vec<SyncPairConfig>,
}

impl AgentConfig {
    /// Load configuration from a JSON file at `path`, auto-populating
    /// `node_id` (and persisting it back) on first load, then validating
    /// the result. Any failure here is fatal per the error taxonomy.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;

        let mut cfg: AgentConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;

        cfg.validate()?;

        if cfg.node_id.is_none() {
            cfg.node_id = Some(Uuid::new_v4().simple().to_string());
            cfg.save(path)?;
        }

        Ok(cfg)
    }

    /// Persist the config back to `path` as pretty JSON, mirroring the
    /// original agent's auto-save-on-first-run behavior.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    fn validate(&self) -> Result<()> {
        if self.sync_interval_minutes == 0 {
            return Err(EngineError::Config(
                "sync_interval_minutes must be >= 1".into(),
            ));
        }

        if self.sync_pairs.is_empty() {
            return Err(EngineError::Config(
                "sync_pairs must contain at least one pair".into(),
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        for pair in &self.sync_pairs {
            if pair.name.is_empty() {
                return Err(EngineError::Config("sync pair name must not be empty".into()));
            }
            if !seen_names.insert(pair.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "duplicate sync pair name: {}",
                    pair.name
                )));
            }
            validate_endpoint(&pair.name, "local", &pair.local)?;
            validate_endpoint(&pair.name, "cloud", &pair.cloud)?;
        }

        Ok(())
    }

    pub fn node_id(&self) -> &str {
        self.node_id.as_deref().unwrap_or_default()
    }
}

fn validate_endpoint(pair_name: &str, side: &str, endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.host.is_empty() || endpoint.user.is_empty() || endpoint.db.is_empty() {
        return Err(EngineError::Config(format!(
            "sync pair '{}': missing {} connection info (host/user/db required)",
            pair_name, side
        )));
    }
    Ok(())
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "sync_interval_minutes": 5,
            "sync_pairs": [
                {
                    "name": "store-1",
                    "local": {"host": "127.0.0.1", "user": "root", "password": "x", "db": "store1"},
                    "cloud": {"host": "cloud.example.com", "user": "root", "password": "y", "db": "store1"},
                    "tables": "all",
                    "conflict_resolution": "timestamp_wins"
                }
            ]
        }"#
    }

    #[test]
    fn load_populates_and_persists_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();

        let cfg = AgentConfig::load(&path).unwrap();
        assert!(cfg.node_id.is_some());

        let reloaded = AgentConfig::load(&path).unwrap();
        assert_eq!(reloaded.node_id, cfg.node_id);
    }

    #[test]
    fn default_port_is_3306() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();

        let cfg = AgentConfig::load(&path).unwrap();
        assert_eq!(cfg.sync_pairs[0].local.port, 3306);
    }

    #[test]
    fn rejects_missing_endpoint_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"sync_pairs": [{"name": "p", "local": {"host": "", "user": "", "password": "", "db": ""}, "cloud": {"host": "h", "user": "u", "password": "p", "db": "d"}}]}"#,
        )
        .unwrap();

        assert!(AgentConfig::load(&path).is_err());
    }

    #[test]
    fn rejects_duplicate_pair_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"sync_pairs": [
                {"name": "p", "local": {"host": "h", "user": "u", "password": "p", "db": "d"}, "cloud": {"host": "h2", "user": "u", "password": "p", "db": "d"}},
                {"name": "p", "local": {"host": "h", "user": "u", "password": "p", "db": "d"}, "cloud": {"host": "h2", "user": "u", "password": "p", "db": "d"}}
            ]}"#,
        )
        .unwrap();

        assert!(AgentConfig::load(&path).is_err());
    }

    #[test]
    fn direction_for_defaults_to_bidirectional() {
        let pair = SyncPairConfig {
            name: "p".into(),
            local: EndpointConfig {
                host: "h".into(),
                port: 3306,
                user: "u".into(),
                password: "p".into(),
                db: "d".into(),
            },
            cloud: EndpointConfig {
                host: "h2".into(),
                port: 3306,
                user: "u".into(),
                password: "p".into(),
                db: "d".into(),
            },
            tables: TableSelection::All(AllTablesTag::All),
            conflict_resolution: ConflictStrategy::TimestampWins,
            table_overrides: HashMap::new(),
        };
        assert_eq!(pair.direction_for("orders"), TableDirection::Bidirectional);
    }
}
