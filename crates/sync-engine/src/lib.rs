//! Multi-master CDC replication engine.
//!
//! Trigger-captured row mutations (`types`, `store`, `triggers`) flow
//! through a per-direction fetch/detect/resolve/apply loop (`fetch`,
//! `conflict`, `apply`, `driver`), orchestrated on a schedule (`scheduler`)
//! and exposed to operators through a read-only audit view (`monitor`).

pub mod apply;
pub mod conflict;
pub mod driver;
pub mod fetch;
pub mod monitor;
pub mod schema;
pub mod scheduler;
pub mod store;
pub mod triggers;
pub mod types;

pub use apply::Applier;
pub use conflict::{ConflictDetector, ConflictHandler, ConflictResolver, ResolutionAction};
pub use driver::{DirectionStats, ReplicationDriver};
pub use fetch::ChangeFetcher;
pub use monitor::ConflictMonitor;
pub use schema::{SchemaBootstrapper, TableInfo};
pub use scheduler::AgentHandle;
pub use store::{ChangeLogStore, ConflictLogStore, SchemaIntrospector, SqlStore, SyncStore, TargetTableStore};
pub use triggers::TriggerSynthesizer;
pub use types::{
    ChangeRecord, ConflictDetails, ConflictLogEntry, ConflictSummary, ConflictType,
    FieldConflictEntry, NewConflictLogEntry, Operation, ResolutionOutcome,
};
