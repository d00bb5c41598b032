use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a sync pair a database plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Cloud,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Cloud => "cloud",
        }
    }
}

/// A replication node identity: a per-database identity deterministically
/// derived from sync-pair name and side (§3.5). The same database in the
/// same pair always produces the same `NodeId`, so a restarted agent never
/// re-replicates changes it already delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Deterministic per-database identity from `(sync_pair_name, side)`.
    ///
    /// Uses UUIDv5 (namespace-hashed, not random) so the same pair name and
    /// side always produce the same node ID across processes and restarts —
    /// this is the "hash_uuid" referenced in the data model.
    pub fn for_pair_side(sync_pair_name: &str, side: Side) -> Self {
        let basis = format!("{}_{}", sync_pair_name, side.as_str());
        let id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, basis.as_bytes());
        NodeId(id.as_simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}
