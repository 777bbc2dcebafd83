//! Durable execution history.
//!
//! Records are written as whole snapshots by their owning runner. Stores
//! reject any write that would change a terminal record or drop step
//! results, so the persisted history only ever grows.

mod memory;
mod postgres;

pub use memory::InMemoryExecutionStore;
pub use postgres::PgExecutionStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{ExecutionRecord, ExecutionStatus};

/// Execution store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error("execution {0} is terminal and cannot be overwritten")]
    Terminal(Uuid),

    #[error("execution {id} snapshot has {incoming} step results, {stored} already stored")]
    Regression {
        id: Uuid,
        stored: usize,
        incoming: usize,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the same write may succeed if repeated. Rule violations never do.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Persistence for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Store a new record.
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Replace a record with a newer snapshot.
    async fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Records of a workflow, most recent first.
    async fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Write rules shared by every store.
pub(crate) fn check_overwrite(stored: &ExecutionRecord, incoming: &ExecutionRecord) -> Result<(), StoreError> {
    if stored.is_terminal() {
        return Err(StoreError::Terminal(stored.id));
    }
    if incoming.step_results.len() < stored.step_results.len() {
        return Err(StoreError::Regression {
            id: stored.id,
            stored: stored.step_results.len(),
            incoming: incoming.step_results.len(),
        });
    }
    Ok(())
}
