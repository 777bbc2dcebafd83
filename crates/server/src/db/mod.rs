//! PostgreSQL connectivity for the server.
//!
//! The execution tables themselves are owned by
//! [`stepflow_engine::PgExecutionStore`]; this module only builds the pool.

pub mod pool;

pub use pool::{connect, ping, pool_options, DbPool};
