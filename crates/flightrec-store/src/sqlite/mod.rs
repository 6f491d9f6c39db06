//! SQLite plumbing: pooled connections and schema migrations.

pub mod connection;
pub mod migrations;

pub use connection::{open_memory_pool, open_pool, ConnectionPool, PooledConnection};
pub use migrations::run_migrations;
