//! In-memory execution store.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use super::{check_overwrite, ExecutionStore, StoreError};
use crate::record::{ExecutionRecord, ExecutionStatus};

type Shard = RwLock<HashMap<Uuid, Arc<ExecutionRecord>>>;

/// Sharded in-memory store.
///
/// Records live in shards keyed by id so writes for unrelated executions
/// rarely touch the same lock. Secondary indexes by workflow and by status
/// are kept alongside.
pub struct InMemoryExecutionStore {
    shards: Vec<Shard>,
    by_workflow: RwLock<HashMap<String, Vec<Uuid>>>,
    by_status: RwLock<HashMap<ExecutionStatus, HashSet<Uuid>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::with_shards(16)
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            by_workflow: RwLock::new(HashMap::new()),
            by_status: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, id: &Uuid) -> &Shard {
        let index = (id.as_u128() % self.shards.len() as u128) as usize;
        &self.shards[index]
    }

    fn snapshot(&self, id: &Uuid) -> Option<Arc<ExecutionRecord>> {
        self.shard(id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn move_status(&self, id: Uuid, from: Option<ExecutionStatus>, to: ExecutionStatus) {
        let mut index = self.by_status.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(from) = from {
            if from == to {
                return;
            }
            if let Some(ids) = index.get_mut(&from) {
                ids.remove(&id);
            }
        }
        index.entry(to).or_default().insert(id);
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        {
            let mut shard = self.shard(&record.id).write().unwrap_or_else(PoisonError::into_inner);
            if shard.contains_key(&record.id) {
                return Err(StoreError::AlreadyExists(record.id));
            }
            shard.insert(record.id, Arc::new(record.clone()));
        }

        self.by_workflow
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.workflow_id.clone())
            .or_default()
            .push(record.id);
        self.move_status(record.id, None, record.status);
        Ok(())
    }

    async fn save(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let previous = {
            let mut shard = self.shard(&record.id).write().unwrap_or_else(PoisonError::into_inner);
            let stored = shard.get(&record.id).ok_or(StoreError::NotFound(record.id))?;
            check_overwrite(stored, record)?;
            let previous = stored.status;
            shard.insert(record.id, Arc::new(record.clone()));
            previous
        };

        self.move_status(record.id, Some(previous), record.status);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.snapshot(&id).map(|r| r.as_ref().clone()))
    }

    async fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let ids = self
            .by_workflow
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
            .unwrap_or_default();

        let mut records: Vec<Arc<ExecutionRecord>> =
            ids.iter().filter_map(|id| self.snapshot(id)).collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records
            .into_iter()
            .take(limit)
            .map(|r| r.as_ref().clone())
            .collect())
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>, StoreError> {
        let ids: Vec<Uuid> = self
            .by_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&status)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut records: Vec<ExecutionRecord> = ids
            .iter()
            .filter_map(|id| self.snapshot(id))
            .filter(|r| r.status == status)
            .map(|r| r.as_ref().clone())
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(records)
    }
}
