//! Lookup of workflow definitions by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;

/// Read-only supplier of workflow definitions.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Definition for `workflow_id`, or `None` if it does not exist.
    ///
    /// An error means the definition exists but could not be read.
    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, ValidationError>;
}

/// Workflow definitions held in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowSource {
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl InMemoryWorkflowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    pub fn insert(&self, definition: WorkflowDefinition) {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id.clone(), definition);
    }

    pub fn with(self, definition: WorkflowDefinition) -> Self {
        self.insert(definition);
        self
    }
}

#[async_trait]
impl WorkflowSource for InMemoryWorkflowSource {
    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>, ValidationError> {
        Ok(self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StepDefinition;

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryWorkflowSource::new().with(
            WorkflowDefinition::new("wf", "Workflow").with_step(StepDefinition::condition("gate", "true")),
        );
        assert_eq!(source.get("wf").await.unwrap().unwrap().steps.len(), 1);
        assert!(source.get("other").await.unwrap().is_none());
    }
}
