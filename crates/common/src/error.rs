use thiserror::Error;

/// Error taxonomy for the replication engine.
///
/// Each variant corresponds to one row of the error-handling policy table:
/// callers decide whether a given kind is fatal (`Config`) or per-item
/// recoverable (everything else) — see the `sync-engine` driver and
/// scheduler for how each variant is handled.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("trigger install error: {0}")]
    TriggerInstall(String),

    #[error("apply error: {0}")]
    Apply(String),

    #[error("mark-applied error: {0}")]
    MarkApplied(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
