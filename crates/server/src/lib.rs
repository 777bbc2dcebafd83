//! Stepflow Server Library
//!
//! HTTP surface over the [`stepflow_engine`] execution engine:
//!
//! - **Executions**: start a workflow, read its record and progress, cancel it
//! - **History**: list a workflow's executions, most recent first
//! - **Collaborators**: workflow definitions read from a directory and named
//!   connections whose secrets come from the environment
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`connections`]: Connections file loader
//! - [`db`]: PostgreSQL pool for the execution store
//! - [`error`]: Error type with Axum integration
//! - [`handlers`]: HTTP route handlers and the router
//! - [`state`]: Shared application state
//! - [`workflows`]: File-backed workflow source
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stepflow_engine::{Engine, EngineConfig};
//! use stepflow_server::{
//!     config::AppConfig, connections::load_connections, handlers::build_router,
//!     state::AppState, workflows::FileWorkflowSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let connections = load_connections(config.connections_file.as_deref()).await?;
//!     let workflows = FileWorkflowSource::new(&config.workflow_dir);
//!     let engine = Engine::in_memory(EngineConfig::from_env()?, Arc::new(workflows), Arc::new(connections));
//!     let app = build_router(AppState::new(engine, config, None));
//!     // ... bind and serve
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connections;
pub mod db;
pub mod error;
pub mod handlers;
pub mod state;
pub mod workflows;

pub use error::{AppError, AppResult};
