//! Public surface of the workflow execution engine.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancellation::CancellationController;
use crate::config::EngineConfig;
use crate::connection::ConnectionResolver;
use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, EngineResult, ErrorInfo, ErrorKind};
use crate::executor::Executors;
use crate::orchestrator::{ExecutionRunner, FinishedRun};
use crate::plan::PreparedWorkflow;
use crate::progress::ExecutionProgress;
use crate::record::{ExecutionRecord, ExecutionStatus};
use crate::result_ext::ResultExt;
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::workflow_source::WorkflowSource;

type LiveExecutions = RwLock<HashMap<Uuid, watch::Receiver<Arc<ExecutionRecord>>>>;

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    workflows: Arc<dyn WorkflowSource>,
    connections: Arc<dyn ConnectionResolver>,
    cancellation: CancellationController,
    live: LiveExecutions,
    /// Settled snapshots the store refused to take.
    unsaved: RwLock<HashMap<Uuid, Arc<ExecutionRecord>>>,
}

impl EngineInner {
    fn live_receiver(&self, id: Uuid) -> Option<watch::Receiver<Arc<ExecutionRecord>>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn unsaved(&self, id: Uuid) -> Option<Arc<ExecutionRecord>> {
        self.unsaved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Latest known snapshot of an execution the store may be behind on.
    fn snapshot(&self, id: Uuid) -> Option<Arc<ExecutionRecord>> {
        if let Some(receiver) = self.live_receiver(id) {
            let snapshot = receiver.borrow().clone();
            return Some(snapshot);
        }
        self.unsaved(id)
    }

    fn settle(&self, id: Uuid, finished: FinishedRun) {
        if !finished.persisted {
            error!(
                execution_id = %id,
                status = %finished.record.status,
                "Final execution state was not stored, serving it from memory"
            );
            self.unsaved
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, Arc::new(finished.record));
        }
        self.cancellation.release(id);
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Runs workflows and answers questions about their executions.
///
/// Each execution runs as its own task. The engine keeps a watch channel per
/// live execution so status reads never wait on the running step. Settled
/// executions are read from the store, except those whose final write the
/// store rejected, which stay in memory until [`Engine::flush_unsaved`]
/// stores them.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ExecutionStore>,
        workflows: Arc<dyn WorkflowSource>,
        connections: Arc<dyn ConnectionResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                workflows,
                connections,
                cancellation: CancellationController::new(),
                live: RwLock::new(HashMap::new()),
                unsaved: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Engine backed by an in-memory store sized from the config.
    pub fn in_memory(
        config: EngineConfig,
        workflows: Arc<dyn WorkflowSource>,
        connections: Arc<dyn ConnectionResolver>,
    ) -> Self {
        let store = Arc::new(InMemoryExecutionStore::with_shards(config.store_shards));
        Self::new(config, store, workflows, connections)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn ExecutionStore> {
        self.inner.store.clone()
    }

    /// Number of executions with a running task.
    pub fn live_count(&self) -> usize {
        self.inner
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Start an execution of a stored workflow. Returns as soon as the
    /// execution record exists; the steps run in the background.
    pub async fn start_execution(&self, workflow_id: &str, triggered_by: &str) -> EngineResult<Uuid> {
        let definition = self
            .inner
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        self.start_definition(&definition, triggered_by).await
    }

    /// Start an execution of a definition supplied by the caller.
    pub async fn start_definition(
        &self,
        definition: &WorkflowDefinition,
        triggered_by: &str,
    ) -> EngineResult<Uuid> {
        let plan = Arc::new(PreparedWorkflow::compile(definition)?);
        let client = self.inner.connections.resolve(plan.connection_id.as_deref())?;
        let retry = self.inner.config.retry_policy();

        let id = Uuid::new_v4();
        let record = ExecutionRecord::new(
            id,
            &plan.id,
            &plan.name,
            triggered_by,
            plan.total_steps(),
            retry.max_attempts,
        );
        self.inner
            .store
            .insert(&record)
            .await
            .log(format!("creating execution {id}"))?;

        let deadline = plan
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let cancel = self.inner.cancellation.token(id);
        let (publisher, receiver) = watch::channel(Arc::new(record.clone()));
        self.inner
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, receiver);

        let runner = ExecutionRunner::new(
            plan.clone(),
            record,
            Executors::new(client, self.inner.config.call_timeout()),
            retry,
            self.inner.config.condition_policy,
            self.inner.store.clone(),
            cancel,
            deadline,
            publisher,
        );

        info!(
            execution_id = %id,
            workflow_id = %plan.id,
            triggered_by,
            steps = plan.total_steps(),
            "Execution started"
        );

        let inner = self.inner.clone();
        let span = info_span!("execution", execution_id = %id, workflow_id = %plan.id);
        tokio::spawn(
            async move {
                let finished = runner.run().await;
                inner.settle(id, finished);
            }
            .instrument(span),
        );

        Ok(id)
    }

    /// Ask a running execution to stop. Settled executions are left alone.
    pub async fn cancel_execution(&self, id: Uuid) -> EngineResult<()> {
        if self.inner.cancellation.cancel(id) {
            info!(execution_id = %id, "Cancellation requested");
            return Ok(());
        }
        match self.inner.store.get(id).await? {
            Some(record) => {
                info!(execution_id = %id, status = %record.status, "Cancel ignored, execution is not running");
                Ok(())
            }
            None => Err(EngineError::ExecutionNotFound(id)),
        }
    }

    /// Number of settled executions whose final state is held in memory
    /// because the store rejected it.
    pub fn unsaved_count(&self) -> usize {
        self.inner
            .unsaved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Retry storing settled snapshots the store rejected earlier. Returns
    /// how many are still held in memory.
    pub async fn flush_unsaved(&self) -> usize {
        let pending: Vec<Arc<ExecutionRecord>> = self
            .inner
            .unsaved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for record in pending {
            match self.inner.store.save(&record).await {
                Ok(()) => {
                    info!(execution_id = %record.id, status = %record.status, "Stored held execution state");
                    self.inner
                        .unsaved
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&record.id);
                }
                Err(e) => warn!(execution_id = %record.id, error = %e, "Held execution state still not stored"),
            }
        }
        self.unsaved_count()
    }

    /// Full record, including every step result.
    pub async fn get_execution_details(&self, id: Uuid) -> EngineResult<ExecutionRecord> {
        if let Some(snapshot) = self.inner.snapshot(id) {
            return Ok(snapshot.as_ref().clone());
        }
        self.inner
            .store
            .get(id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(id))
    }

    pub async fn get_execution_status(&self, id: Uuid) -> EngineResult<ExecutionProgress> {
        let record = self.get_execution_details(id).await?;
        Ok(ExecutionProgress::from_record(&record))
    }

    /// Executions of a workflow, most recent first. Defaults to the
    /// configured history limit.
    pub async fn list_execution_history(
        &self,
        workflow_id: &str,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ExecutionRecord>> {
        let limit = limit.unwrap_or(self.inner.config.history_limit);
        let mut records = self.inner.store.list_by_workflow(workflow_id, limit).await?;
        for record in &mut records {
            if let Some(snapshot) = self.inner.snapshot(record.id) {
                *record = snapshot.as_ref().clone();
            }
        }
        Ok(records)
    }

    /// Live snapshots of an execution. For settled executions the receiver
    /// holds the stored record and never changes.
    pub async fn subscribe(&self, id: Uuid) -> EngineResult<watch::Receiver<Arc<ExecutionRecord>>> {
        if let Some(receiver) = self.inner.live_receiver(id) {
            return Ok(receiver);
        }
        if let Some(snapshot) = self.inner.unsaved(id) {
            let (_, receiver) = watch::channel(snapshot);
            return Ok(receiver);
        }
        let record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(id))?;
        let (_, receiver) = watch::channel(Arc::new(record));
        Ok(receiver)
    }

    /// Resolve once the execution has settled.
    pub async fn wait_for_completion(&self, id: Uuid) -> EngineResult<ExecutionRecord> {
        let mut receiver = self.subscribe(id).await?;
        loop {
            {
                let snapshot = receiver.borrow_and_update();
                if snapshot.is_terminal() {
                    return Ok(snapshot.as_ref().clone());
                }
            }
            if receiver.changed().await.is_err() {
                // The runner is gone and has settled the record.
                return self.get_execution_details(id).await;
            }
        }
    }

    /// Fail stored executions left non-terminal by a previous process.
    /// Returns how many were marked.
    pub async fn fail_interrupted(&self) -> EngineResult<usize> {
        let mut marked = 0;
        for status in [ExecutionStatus::Pending, ExecutionStatus::Running] {
            for mut record in self.inner.store.list_by_status(status).await? {
                if self.inner.snapshot(record.id).is_some() {
                    continue;
                }
                record
                    .finish(
                        ExecutionStatus::Failed,
                        Some(ErrorInfo::new(ErrorKind::Internal, "execution interrupted")),
                    )
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                self.inner.store.save(&record).await?;
                warn!(execution_id = %record.id, previous = %status, "Marked interrupted execution as failed");
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Cancel every live execution and wait for them to settle.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<Uuid> = self
            .inner
            .live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        let signalled = self.inner.cancellation.cancel_all();
        info!(executions = signalled, "Shutting down engine");
        for id in ids {
            let _ = self.wait_for_completion(id).await;
        }
        let unsaved = self.flush_unsaved().await;
        if unsaved > 0 {
            error!(executions = unsaved, "Final execution states lost on shutdown");
        }
        signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionClient, StaticConnectionResolver};
    use crate::definition::StepDefinition;
    use crate::executor::tests::{ok_json, ScriptedClient};
    use crate::orchestrator::FINAL_SAVE_ATTEMPTS;
    use crate::store::tests::FlakyStore;
    use crate::record::StepStatus;
    use crate::workflow_source::InMemoryWorkflowSource;
    use serde_json::json;

    fn engine_with(client: Arc<dyn ConnectionClient>, workflows: InMemoryWorkflowSource) -> Engine {
        Engine::in_memory(
            EngineConfig {
                retry_base_delay_ms: 1,
                ..EngineConfig::default()
            },
            Arc::new(workflows),
            Arc::new(StaticConnectionResolver::with_default(client)),
        )
    }

    fn single_call(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(id, "Single").with_step(StepDefinition::api_call("call", json!({"path": "/"})))
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let client = Arc::new(ScriptedClient::new(vec![ok_json(200, json!({"ok": true}))]));
        let engine = engine_with(client, InMemoryWorkflowSource::new().with(single_call("wf")));

        let id = engine.start_execution("wf", "tester").await.unwrap();
        let record = engine.wait_for_completion(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.step_results[0].status, StepStatus::Success);

        let progress = engine.get_execution_status(id).await.unwrap();
        assert_eq!(progress.completed_steps, 1);
        assert_eq!(progress.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let engine = engine_with(Arc::new(ScriptedClient::new(vec![])), InMemoryWorkflowSource::new());
        assert!(matches!(
            engine.start_execution("missing", "tester").await,
            Err(EngineError::WorkflowNotFound(_))
        ));
        let id = Uuid::new_v4();
        assert!(matches!(engine.cancel_execution(id).await, Err(EngineError::ExecutionNotFound(_))));
        assert!(matches!(engine.get_execution_status(id).await, Err(EngineError::ExecutionNotFound(_))));
        assert!(matches!(engine.get_execution_details(id).await, Err(EngineError::ExecutionNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_workflow_creates_no_record() {
        let engine = engine_with(Arc::new(ScriptedClient::new(vec![])), InMemoryWorkflowSource::new());
        let empty = WorkflowDefinition::new("empty", "Empty");
        assert!(matches!(
            engine.start_definition(&empty, "tester").await,
            Err(EngineError::Validation(_))
        ));
        assert!(engine.list_execution_history("empty", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_settled_execution_is_noop() {
        let client = Arc::new(ScriptedClient::new(vec![ok_json(200, json!({}))]));
        let engine = engine_with(client, InMemoryWorkflowSource::new().with(single_call("wf")));
        let id = engine.start_execution("wf", "tester").await.unwrap();
        engine.wait_for_completion(id).await.unwrap();

        engine.cancel_execution(id).await.unwrap();
        assert_eq!(
            engine.get_execution_details(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_fail_interrupted() {
        let engine = engine_with(Arc::new(ScriptedClient::new(vec![])), InMemoryWorkflowSource::new());
        let mut orphan = ExecutionRecord::new(Uuid::new_v4(), "wf", "Workflow", "tester", 2, 3);
        engine.store().insert(&orphan).await.unwrap();
        orphan.transition(ExecutionStatus::Running).unwrap();
        engine.store().save(&orphan).await.unwrap();

        assert_eq!(engine.fail_interrupted().await.unwrap(), 1);
        let record = engine.get_execution_details(orphan.id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.unwrap().kind, ErrorKind::Internal);
        assert_eq!(engine.fail_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_live_executions() {
        let mut client = ScriptedClient::new(vec![ok_json(200, json!({}))]);
        client.delay = Duration::from_secs(10);
        let engine = engine_with(Arc::new(client), InMemoryWorkflowSource::new().with(single_call("wf")));
        let id = engine.start_execution("wf", "tester").await.unwrap();

        assert_eq!(engine.shutdown().await, 1);
        let record = engine.get_execution_details(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Canceled);
    }

    fn flaky_engine(store: Arc<FlakyStore>) -> Engine {
        let workflows = InMemoryWorkflowSource::new().with(WorkflowDefinition::new("wf", "Shape").with_step(
            StepDefinition::transform("shape", json!({"mapping": [{"op": "set", "to": "done", "value": true}]})),
        ));
        Engine::new(
            EngineConfig::default(),
            store,
            Arc::new(workflows),
            Arc::new(StaticConnectionResolver::with_default(Arc::new(ScriptedClient::new(vec![])))),
        )
    }

    async fn settled(engine: &Engine) {
        while engine.live_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_unstored_final_state_served_from_memory() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let engine = flaky_engine(store.clone());
        let id = engine.start_execution("wf", "tester").await.unwrap();
        let record = engine.wait_for_completion(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        settled(&engine).await;

        assert_eq!(engine.unsaved_count(), 1);
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ExecutionStatus::Running);
        assert_eq!(
            engine.get_execution_details(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
        assert_eq!(
            engine.get_execution_status(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
        assert_eq!(
            engine.wait_for_completion(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
        let history = engine.list_execution_history("wf", None).await.unwrap();
        assert_eq!(history[0].status, ExecutionStatus::Completed);

        assert_eq!(engine.fail_interrupted().await.unwrap(), 0);
        assert_eq!(
            engine.get_execution_details(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_flush_stores_held_final_state() {
        let store = Arc::new(FlakyStore::new(FINAL_SAVE_ATTEMPTS as usize));
        let engine = flaky_engine(store.clone());
        let id = engine.start_execution("wf", "tester").await.unwrap();
        engine.wait_for_completion(id).await.unwrap();
        settled(&engine).await;
        assert_eq!(engine.unsaved_count(), 1);

        assert_eq!(engine.flush_unsaved().await, 0);
        assert_eq!(engine.unsaved_count(), 0);
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(
            engine.get_execution_details(id).await.unwrap().status,
            ExecutionStatus::Completed
        );
    }
}
