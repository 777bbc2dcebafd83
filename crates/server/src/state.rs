//! Application state for the Stepflow server.
//!
//! This module defines the shared application state that is
//! passed to all handlers via Axum's state management.

use crate::config::AppConfig;
use crate::db::DbPool;
use std::sync::Arc;
use stepflow_engine::Engine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Workflow execution engine
    pub engine: Engine,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Database pool when executions are stored in PostgreSQL
    pub db: Option<DbPool>,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Engine, config: AppConfig, db: Option<DbPool>) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            db,
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_engine::{EngineConfig, InMemoryWorkflowSource, StaticConnectionResolver};

    #[test]
    fn test_new_state() {
        let engine = Engine::in_memory(
            EngineConfig::default(),
            Arc::new(InMemoryWorkflowSource::new()),
            Arc::new(StaticConnectionResolver::new()),
        );
        let state = AppState::new(engine, AppConfig::default(), None);
        assert!(state.db.is_none());
        assert_eq!(state.uptime_seconds(), 0);
        assert_eq!(state.config.port, 8090);
    }
}
