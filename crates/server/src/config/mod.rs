//! Configuration for the Stepflow server.
//!
//! Values come from environment variables through `envy`; engine tuning
//! lives in [`stepflow_engine::EngineConfig`] under its own prefix.

mod app;
mod database;

pub use app::{AppConfig, StoreKind};
pub use database::DatabaseConfig;
