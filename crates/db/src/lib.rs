pub mod mysql;
pub mod session;
pub mod value;

pub use mysql::{SqlxAnySession, SqlxConnectionFactory};
pub use session::{ConnectionFactory, DbSession};
pub use value::{Row, Value};
