//! PostgreSQL collaborators: live schema introspection and read-only query execution.

pub mod connection;
pub mod introspector;
pub mod query_executor;

pub use connection::{init_pool, map_sqlx_error, DbPool};
pub use introspector::PgSchemaIntrospector;
pub use query_executor::PgQueryExecutor;
