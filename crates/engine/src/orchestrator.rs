//! The step loop of a single execution.
//!
//! An [`ExecutionRunner`] owns its execution's record and context for the
//! whole run. It is the record's only writer: every change is persisted as
//! a complete snapshot and published to observers, so readers never see a
//! partially updated record.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConditionPolicy;
use crate::context::ExecutionContext;
use crate::error::{ErrorInfo, ErrorKind, StepError};
use crate::executor::{Executors, StepOutcome};
use crate::plan::{PreparedStep, PreparedWorkflow};
use crate::record::{ExecutionRecord, ExecutionStatus, RecordError, StepResult};
use crate::result_ext::ResultExt;
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize_sensitive_data;
use crate::store::ExecutionStore;

/// Writes of a terminal snapshot before the runner gives up on the store.
pub(crate) const FINAL_SAVE_ATTEMPTS: u32 = 5;
const FINAL_SAVE_BACKOFF: Duration = Duration::from_millis(50);

/// Final record of a run.
#[derive(Debug)]
pub struct FinishedRun {
    pub record: ExecutionRecord,
    /// False when the store never accepted the terminal snapshot.
    pub persisted: bool,
}

/// Why the loop stopped before finishing its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Canceled,
    DeadlineExceeded,
}

/// How a step ended.
enum StepRun {
    Succeeded {
        attempts: u32,
        outcome: StepOutcome,
    },
    Failed {
        attempts: u32,
        error: StepError,
    },
    Interrupted(Interruption),
}

/// Runs one execution from `Pending` to a terminal status.
pub struct ExecutionRunner {
    plan: Arc<PreparedWorkflow>,
    record: ExecutionRecord,
    ctx: ExecutionContext,
    executors: Executors,
    retry: RetryPolicy,
    condition_policy: ConditionPolicy,
    store: Arc<dyn ExecutionStore>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    publisher: watch::Sender<Arc<ExecutionRecord>>,
    persisted: bool,
}

impl ExecutionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: Arc<PreparedWorkflow>,
        record: ExecutionRecord,
        executors: Executors,
        retry: RetryPolicy,
        condition_policy: ConditionPolicy,
        store: Arc<dyn ExecutionStore>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        publisher: watch::Sender<Arc<ExecutionRecord>>,
    ) -> Self {
        let ctx = ExecutionContext::new(record.id, record.workflow_id.clone(), record.triggered_by.clone());
        Self {
            plan,
            record,
            ctx,
            executors,
            retry,
            condition_policy,
            store,
            cancel,
            deadline,
            publisher,
            persisted: true,
        }
    }

    /// Drive the execution to a terminal status and return the final record.
    pub async fn run(mut self) -> FinishedRun {
        if let Err(e) = self.drive().await {
            // Only reachable through a bookkeeping bug; settle as failed.
            error!(error = %e, "Execution record rejected an update");
            if !self.record.is_terminal() {
                let info = ErrorInfo::new(ErrorKind::Internal, e.to_string());
                if self.record.finish(ExecutionStatus::Failed, Some(info)).is_ok() {
                    self.persist().await;
                }
            }
        }
        info!(
            status = %self.record.status,
            steps = self.record.step_results.len(),
            duration_ms = self.record.duration_ms().unwrap_or_default(),
            "Execution finished"
        );
        FinishedRun {
            record: self.record,
            persisted: self.persisted,
        }
    }

    async fn drive(&mut self) -> Result<(), RecordError> {
        if let Some(reason) = self.interruption() {
            return self.interrupt(reason).await;
        }
        self.record.transition(ExecutionStatus::Running)?;
        self.persist().await;
        info!(total_steps = self.plan.total_steps(), "Execution running");

        let plan = self.plan.clone();
        for (position, step) in plan.steps.iter().enumerate() {
            if let Some(reason) = self.interruption() {
                return self.interrupt(reason).await;
            }

            let policy = self.retry.for_step(step.retry.as_ref());
            self.record.begin_step(step.index, policy.max_attempts);
            self.persist().await;

            let started_at = Utc::now();
            match self.run_step(step, &policy).await {
                StepRun::Interrupted(reason) => return self.interrupt(reason).await,
                StepRun::Failed { attempts, error } => {
                    warn!(step = %step.name, attempts, error = %error, "Step failed");
                    let info = ErrorInfo::from(&error);
                    self.record.push_result(StepResult::failed(
                        step.index,
                        &step.name,
                        step.kind.step_type(),
                        started_at,
                        attempts,
                        info.clone(),
                    ))?;
                    self.record.finish(ExecutionStatus::Failed, Some(info))?;
                    self.persist().await;
                    return Ok(());
                }
                StepRun::Succeeded {
                    attempts,
                    outcome: StepOutcome::Branch(false),
                } => {
                    info!(step = %step.name, "Condition is false, skipping remaining steps");
                    self.record
                        .push_result(StepResult::condition_failed(step.index, &step.name, started_at, attempts))?;
                    for rest in &plan.steps[position + 1..] {
                        self.record
                            .push_result(StepResult::skipped(rest.index, &rest.name, rest.kind.step_type()))?;
                    }
                    match self.condition_policy {
                        ConditionPolicy::SkipRemaining => self.record.finish(ExecutionStatus::Completed, None)?,
                        ConditionPolicy::FailExecution => {
                            let info = ErrorInfo::new(
                                ErrorKind::ConditionEvaluation,
                                format!("condition '{}' evaluated to false", step.name),
                            );
                            self.record.finish(ExecutionStatus::Failed, Some(info))?
                        }
                    }
                    self.persist().await;
                    return Ok(());
                }
                StepRun::Succeeded { attempts, outcome } => {
                    let output = match outcome {
                        StepOutcome::Output(value) => {
                            let persisted = sanitize_sensitive_data(&value);
                            self.ctx.insert(step.index, step.name.clone(), value);
                            persisted
                        }
                        StepOutcome::Branch(passed) => Value::Bool(passed),
                    };
                    info!(step = %step.name, attempts, "Step succeeded");
                    self.record.push_result(StepResult::success(
                        step.index,
                        &step.name,
                        step.kind.step_type(),
                        started_at,
                        attempts,
                        output,
                    ))?;
                    self.persist().await;
                }
            }
        }

        self.record.finish(ExecutionStatus::Completed, None)?;
        self.persist().await;
        Ok(())
    }

    /// Attempt a step until it succeeds, fails terminally, exhausts its
    /// budget or is interrupted.
    async fn run_step(&mut self, step: &PreparedStep, policy: &RetryPolicy) -> StepRun {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.record.record_attempt(attempt);
            debug!(step = %step.name, step_type = %step.kind.step_type(), attempt, "Dispatching step");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StepRun::Interrupted(Interruption::Canceled),
                _ = deadline_elapsed(self.deadline) => {
                    return StepRun::Interrupted(Interruption::DeadlineExceeded)
                }
                result = self.executors.execute(&step.kind, &self.ctx, &self.cancel) => result,
            };

            let error = match result {
                Ok(outcome) => {
                    return StepRun::Succeeded {
                        attempts: attempt,
                        outcome,
                    }
                }
                Err(StepError::Canceled) => return StepRun::Interrupted(Interruption::Canceled),
                Err(error) => error,
            };

            let decision = policy.should_retry(&error, attempt, policy.max_attempts);
            if !decision.retry {
                return StepRun::Failed {
                    attempts: attempt,
                    error,
                };
            }

            warn!(
                step = %step.name,
                attempt,
                max_attempts = policy.max_attempts,
                backoff_ms = decision.backoff.as_millis() as u64,
                error = %error,
                "Retrying step"
            );
            self.persist().await;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StepRun::Interrupted(Interruption::Canceled),
                _ = deadline_elapsed(self.deadline) => {
                    return StepRun::Interrupted(Interruption::DeadlineExceeded)
                }
                _ = tokio::time::sleep(decision.backoff) => {}
            }
        }
    }

    /// Cancellation wins over the deadline when both have tripped.
    fn interruption(&self) -> Option<Interruption> {
        if self.cancel.is_cancelled() {
            return Some(Interruption::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    async fn interrupt(&mut self, reason: Interruption) -> Result<(), RecordError> {
        match reason {
            Interruption::Canceled => {
                info!("Execution canceled");
                self.record.finish(
                    ExecutionStatus::Canceled,
                    Some(ErrorInfo::new(ErrorKind::Canceled, "execution canceled")),
                )?;
            }
            Interruption::DeadlineExceeded => {
                let timeout_ms = self.plan.timeout_ms.unwrap_or_default();
                warn!(timeout_ms, "Execution exceeded its deadline");
                self.record.finish(
                    ExecutionStatus::Failed,
                    Some(ErrorInfo::new(
                        ErrorKind::ExecutionTimeout,
                        format!("execution exceeded its {timeout_ms} ms deadline"),
                    )),
                )?;
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Write the current record to the store and publish it to observers.
    /// A terminal snapshot is retried with backoff on transient store errors.
    async fn persist(&mut self) {
        let terminal = self.record.is_terminal();
        let mut backoff = FINAL_SAVE_BACKOFF;
        let mut attempt = 1;
        let result = loop {
            match self.store.save(&self.record).await {
                Err(e) if terminal && e.is_transient() && attempt < FINAL_SAVE_ATTEMPTS => {
                    warn!(attempt, error = %e, "Final execution write failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                result => break result,
            }
        };
        self.persisted = result
            .log(format!("persisting execution {}", self.record.id))
            .is_ok();
        self.publisher.send_replace(Arc::new(self.record.clone()));
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
