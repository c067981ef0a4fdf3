//! Zentra LumaDB Client
//!
//! PostgreSQL wire-protocol connection pooling for LumaDB, used by the
//! wallet journal.

mod error;
mod pool;

pub use error::{LumaDbError, Result};
pub use pool::{LumaDbPool, PoolConfig, PoolStats};

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{
    types::{FromSql, ToSql},
    Row,
};
