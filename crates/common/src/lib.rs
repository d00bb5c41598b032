pub mod config;
pub mod error;
pub mod node;

pub use config::{
    default_config_path, AgentConfig, AllTablesTag, ConflictStrategy, EndpointConfig,
    SyncPairConfig, TableDirection, TableOverride, TableSelection,
};
pub use error::{EngineError, Result};
pub use node::{NodeId, Side};
