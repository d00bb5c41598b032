use async_trait::async_trait;
use common::{EndpointConfig, Result};

use crate::value::{Row, Value};

/// Typed handle to a database session.
///
/// This is the full capability set the replication engine needs: a
/// parameterized statement runner with row-fetching and a name for
/// diagnostics. No cursor object, no ORM — see Design Notes §9
/// ("Polymorphism"): a small capability set, not an inheritance tree.
#[async_trait]
pub trait DbSession: Send + Sync {
    /// Run `sql` and return every row it produces.
    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run `sql` and return at most one row.
    async fn fetch_one_opt(&self, sql: &str, params: &[Value]) -> Result<Option<Row>>;

    /// Run `sql` for its side effect; returns the number of rows affected.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// The database name this session is connected to (used in log context
    /// and in a handful of `INFORMATION_SCHEMA` lookups).
    fn db_name(&self) -> &str;
}

/// Builds `DbSession`s from an `EndpointConfig`. Injected into the engine so
/// the replication driver, scheduler, and bootstrapper never construct a
/// connection pool themselves — see §1 "Out of scope: Connection factories".
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<Box<dyn DbSession>>;
}
